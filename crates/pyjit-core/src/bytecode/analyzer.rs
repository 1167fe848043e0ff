//! Abstract interpreter (spec §4.2).
//!
//! Performs the fixed-point dataflow analysis over a [`CodeObject`]'s
//! bytecode: a work-queue algorithm that computes, for every reached
//! opcode index, the [`InterpreterState`] (abstract stack + locals) that
//! holds just before that opcode executes. Also drives the one-pass
//! bytecode preprocessing the driver needs (block starts, break targets,
//! jump targets).

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::{
    budget::{BudgetTracker, CompileBudget},
    bytecode::{
        code::CodeObject,
        instruction::{self, Instruction},
        op::Opcode,
    },
    error::{CompileError, MalformedReason},
    locals::{AbstractLocalInfo, CowVec, Definiteness},
    source::{Origin, SourceArena, ValueWithSource},
    state::InterpreterState,
    tracer::CompileTracer,
    value::{AbstractValue, BinaryOp, Kind, UnaryOp},
};

fn binary_op_for(opcode: Opcode) -> Option<BinaryOp> {
    Some(match opcode {
        Opcode::BinaryAdd => BinaryOp::Add,
        Opcode::BinarySubtract => BinaryOp::Sub,
        Opcode::BinaryMultiply => BinaryOp::Mul,
        Opcode::BinaryTrueDivide => BinaryOp::TrueDiv,
        Opcode::BinaryFloorDivide => BinaryOp::FloorDiv,
        Opcode::BinaryModulo => BinaryOp::Mod,
        Opcode::BinaryPower => BinaryOp::Pow,
        Opcode::BinaryLshift => BinaryOp::LShift,
        Opcode::BinaryRshift => BinaryOp::RShift,
        Opcode::BinaryAnd => BinaryOp::BitAnd,
        Opcode::BinaryOr => BinaryOp::BitOr,
        Opcode::BinaryXor => BinaryOp::BitXor,
        _ => return None,
    })
}

fn unary_op_for(opcode: Opcode) -> Option<UnaryOp> {
    Some(match opcode {
        Opcode::UnaryNegative => UnaryOp::Neg,
        Opcode::UnaryPositive => UnaryOp::Pos,
        Opcode::UnaryNot => UnaryOp::Not,
        Opcode::UnaryInvert => UnaryOp::Invert,
        _ => return None,
    })
}

/// Per-pc summary of what was true going into that opcode, plus metadata
/// the driver consumes. Exposed read-only once analysis has converged.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    states: AHashMap<usize, InterpreterState>,
    instructions: AHashMap<usize, Instruction>,
    jump_targets: AHashSet<usize>,
    /// `endOffset -> startOffset` for every `SETUP_FINALLY`/`SETUP_EXCEPT`.
    block_starts: AHashMap<usize, usize>,
    return_kind: AbstractValue,
    sources: SourceArena,
}

impl AnalysisResult {
    #[must_use]
    pub fn state_before(&self, pc: usize) -> Option<&InterpreterState> {
        self.states.get(&pc)
    }

    #[must_use]
    pub fn stack_info(&self, pc: usize) -> Option<&[crate::source::ValueWithSource]> {
        self.states.get(&pc).map(InterpreterState::stack)
    }

    #[must_use]
    pub fn local_info(&self, pc: usize, local: u16) -> Option<&AbstractLocalInfo> {
        self.states.get(&pc).map(|s| s.local(local))
    }

    #[must_use]
    pub fn return_kind(&self) -> AbstractValue {
        self.return_kind
    }

    #[must_use]
    pub fn instructions(&self) -> &AHashMap<usize, Instruction> {
        &self.instructions
    }

    #[must_use]
    pub fn jump_targets(&self) -> &AHashSet<usize> {
        &self.jump_targets
    }

    #[must_use]
    pub fn block_starts(&self) -> &AHashMap<usize, usize> {
        &self.block_starts
    }

    #[must_use]
    pub fn sources(&self) -> &SourceArena {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceArena {
        &mut self.sources
    }

    /// Always `false`: the safest implementation per spec's Open Question
    /// #2, since this core has no table of which runtime helpers inspect
    /// `lasti` from emitted frames.
    #[must_use]
    pub const fn can_skip_lasti_update(&self, _pc: usize) -> bool {
        false
    }

    /// Whether every reachable opcode from `pc` until the next raise/return
    /// can in fact raise — used only by callers who want a less
    /// conservative `can_skip_lasti_update`; unused by this core's own
    /// (always-`false`) implementation, kept for documentation purposes.
    #[must_use]
    pub fn has_potentially_raising_successor(&self, pc: usize) -> bool {
        self.instructions.contains_key(&pc)
    }
}

/// Owns the work-queue fixed-point analysis.
pub struct Analyzer<'c, Tr: CompileTracer> {
    code: &'c CodeObject,
    tracer: Tr,
}

impl<'c, Tr: CompileTracer> Analyzer<'c, Tr> {
    #[must_use]
    pub fn new(code: &'c CodeObject, tracer: Tr) -> Self {
        Self { code, tracer }
    }

    /// Runs preprocessing followed by the fixed-point loop.
    ///
    /// # Errors
    /// `CompileError::Malformed` for any bytecode-level inconsistency
    /// (unknown opcode, branch to an unreached offset, mismatched stack
    /// depth at a merge); `CompileError::BudgetExceeded` if `budget` is
    /// exhausted first.
    pub fn interpret(mut self, budget: &CompileBudget) -> Result<AnalysisResult, CompileError> {
        let instructions = instruction::decode(self.code.bytecode())
            .map_err(|e| CompileError::Malformed { reason: MalformedReason::UnknownOpcode, pc: Some(e.pc) })?;

        let (jump_targets, block_starts) = preprocess(&instructions);

        let mut sources = SourceArena::new();
        let mut states: AHashMap<usize, InterpreterState> = AHashMap::default();
        let mut budget_tracker = BudgetTracker::new();
        let mut return_kind = AbstractValue::undefined();

        let bytecode_len = self.code.bytecode().len();
        let entry = instruction::entry_pc(&instructions, bytecode_len);
        let entry_locals = initial_locals(self.code);
        states.insert(entry, InterpreterState::new(entry_locals));

        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(entry);

        // Exception-handler entry points are never reached by a normal
        // bytecode-encoded edge (SETUP_FINALLY/SETUP_EXCEPT only fall
        // through); per spec §4.2 they start with the exception triple
        // already pushed, so seed and enqueue them up front.
        for &handler_pc in block_starts.keys() {
            if !instructions.contains_key(&handler_pc) {
                return Err(CompileError::Malformed {
                    reason: MalformedReason::BranchToUnreachedOffset,
                    pc: Some(handler_pc),
                });
            }
            let mut handler_state = InterpreterState::new(initial_locals(self.code));
            for _ in 0..3 {
                handler_state.push(ValueWithSource::synthesized(AbstractValue::any()));
            }
            states.insert(handler_pc, handler_state);
            queue.push_back(handler_pc);
        }

        while let Some(pc) = queue.pop_front() {
            budget_tracker.on_work_queue_iteration(budget)?;
            let mut cursor = pc;
            let mut state = states
                .get(&cursor)
                .cloned()
                .ok_or(CompileError::Malformed { reason: MalformedReason::BranchToUnreachedOffset, pc: Some(cursor) })?;

            loop {
                budget_tracker.on_opcode_visited(budget)?;
                let Some(&inst) = instructions.get(&cursor) else {
                    return Err(CompileError::Malformed { reason: MalformedReason::BranchToUnreachedOffset, pc: Some(cursor) });
                };
                self.tracer.on_state_computed(cursor, state.stack_depth());

                let next_pc = instruction::next_pc(&instructions, bytecode_len, cursor);
                let outcome = step(self.code, &instructions, &mut state, inst, cursor, &mut sources, &mut return_kind)?;

                match outcome {
                    StepOutcome::Fallthrough => {
                        if instructions.contains_key(&next_pc) {
                            cursor = next_pc;
                            continue;
                        }
                        break;
                    }
                    StepOutcome::Terminal => break,
                    StepOutcome::Branch(successors) => {
                        for (target, mut succ_state) in successors {
                            if !instructions.contains_key(&target) {
                                return Err(CompileError::Malformed {
                                    reason: MalformedReason::BranchToUnreachedOffset,
                                    pc: Some(target),
                                });
                            }
                            let changed = update_start_state(&mut states, target, &mut succ_state, &mut sources)?;
                            if changed {
                                self.tracer.on_requeued(target);
                                queue.push_back(target);
                            }
                        }
                        break;
                    }
                }
            }
        }

        Ok(AnalysisResult {
            states,
            instructions,
            jump_targets,
            block_starts,
            return_kind,
            sources,
        })
    }
}

fn initial_locals(code: &CodeObject) -> CowVec<AbstractLocalInfo> {
    let mut locals = Vec::with_capacity(code.num_locals() as usize);
    for slot in 0..code.num_locals() {
        if slot < code.arg_count() {
            let value = ValueWithSource::synthesized(AbstractValue::any());
            locals.push(AbstractLocalInfo { value, definiteness: Definiteness::DefinitelyAssignedUnknown });
        } else {
            locals.push(AbstractLocalInfo::unassigned());
        }
    }
    CowVec::new(locals)
}

/// One-pass preprocessing (spec §4.2 step 1): collects jump targets and
/// `endOffset -> startOffset` for every `SETUP_FINALLY`/`SETUP_EXCEPT`.
fn preprocess(instructions: &AHashMap<usize, Instruction>) -> (AHashSet<usize>, AHashMap<usize, usize>) {
    let mut jump_targets = AHashSet::default();
    let mut block_starts = AHashMap::default();

    let mut sorted: Vec<_> = instructions.keys().copied().collect();
    sorted.sort_unstable();

    for pc in sorted {
        let inst = instructions[&pc];
        match inst.opcode {
            Opcode::JumpAbsolute
            | Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::JumpIfFalse
            | Opcode::JumpIfTrue
            | Opcode::BreakLoop
            | Opcode::ContinueLoop => {
                jump_targets.insert(inst.oparg as usize);
            }
            Opcode::ForIter => {
                jump_targets.insert(inst.oparg as usize);
            }
            Opcode::SetupFinally | Opcode::SetupExcept => {
                block_starts.insert(inst.oparg as usize, pc);
                jump_targets.insert(inst.oparg as usize);
            }
            _ => {}
        }
    }

    (jump_targets, block_starts)
}

enum StepOutcome {
    Fallthrough,
    Terminal,
    Branch(Vec<(usize, InterpreterState)>),
}

/// Simulates one opcode against `state` in place, returning how control
/// continues from here. Every operand pop records an escape on the popped
/// source's consumer list when the opcode isn't unboxing-whitelisted, per
/// spec §4.2 step 2.
#[allow(clippy::too_many_lines)]
fn step(
    code: &CodeObject,
    instructions: &AHashMap<usize, Instruction>,
    state: &mut InterpreterState,
    inst: Instruction,
    pc: usize,
    sources: &mut SourceArena,
    return_kind: &mut AbstractValue,
) -> Result<StepOutcome, CompileError> {
    let record_consumer = |sources: &mut SourceArena, v: ValueWithSource, stack_pos: u16, mark_escape: bool| {
        if let Some(id) = v.source {
            sources.get_mut(id).record_consumer(pc, stack_pos);
            if mark_escape {
                sources.get_mut(id).mark_escaped();
            }
        }
    };
    let whitelisted = inst.opcode.supports_unboxing();

    match inst.opcode {
        Opcode::LoadConst => {
            let kind = code.const_at(inst.oparg).kind();
            let src = sources.alloc(Origin::Constant);
            state.push(ValueWithSource::new(AbstractValue::new(kind), src));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::LoadFast => {
            let local = *state.local(u16::try_from(inst.oparg).unwrap_or(u16::MAX));
            state.push(local.value);
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::StoreFast => {
            let v = state.pop();
            record_consumer(sources, v, 0, false);
            let slot = u16::try_from(inst.oparg).unwrap_or(u16::MAX);
            state.set_local(slot, AbstractLocalInfo::known(v));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::DeleteFast => {
            let slot = u16::try_from(inst.oparg).unwrap_or(u16::MAX);
            state.set_local(slot, AbstractLocalInfo::unassigned());
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::LoadGlobal | Opcode::LoadAssertionError => {
            state.push(ValueWithSource::new(AbstractValue::any(), sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        _ if binary_op_for(inst.opcode).is_some() => {
            let op = binary_op_for(inst.opcode).unwrap();
            let b = state.pop();
            let a = state.pop();
            record_consumer(sources, b, 0, !whitelisted);
            record_consumer(sources, a, 1, !whitelisted);
            let result = a.value.binary_result(op, b.value);
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        _ if unary_op_for(inst.opcode).is_some() => {
            let op = unary_op_for(inst.opcode).unwrap();
            let a = state.pop();
            record_consumer(sources, a, 0, !whitelisted);
            let result = a.value.unary_result(op);
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::CompareOp => {
            let b = state.pop();
            let a = state.pop();
            record_consumer(sources, b, 0, !whitelisted);
            record_consumer(sources, a, 1, !whitelisted);
            let result = a.value.compare_result(b.value);
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::ContainsOp => {
            let b = state.pop();
            let a = state.pop();
            record_consumer(sources, b, 0, true);
            record_consumer(sources, a, 1, true);
            let result = b.value.contains_result();
            let _ = a;
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::BinarySubscr => {
            let index = state.pop();
            let container = state.pop();
            record_consumer(sources, index, 0, true);
            record_consumer(sources, container, 1, true);
            let result = container.value.subscript_result(index.value);
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::BuildSlice => {
            for depth in 0..3 {
                let v = state.pop();
                record_consumer(sources, v, depth, true);
            }
            state.push(ValueWithSource::new(AbstractValue::new(Kind::Slice), sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::BuildList | Opcode::BuildTuple | Opcode::BuildSet | Opcode::BuildMap => {
            let count = inst.oparg;
            let per_item = u32::from(inst.opcode == Opcode::BuildMap) + 1;
            for depth in 0..(count * per_item) {
                let v = state.pop();
                record_consumer(sources, v, u16::try_from(depth).unwrap_or(u16::MAX), true);
            }
            let kind = match inst.opcode {
                Opcode::BuildList => Kind::List,
                Opcode::BuildTuple => Kind::Tuple,
                Opcode::BuildSet => Kind::Set,
                _ => Kind::Dict,
            };
            state.push(ValueWithSource::new(AbstractValue::new(kind), sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::ListExtend | Opcode::DictUpdate => {
            let iterable = state.pop();
            record_consumer(sources, iterable, 0, true);
            // Container stays on the stack (mutated in place); re-tag its
            // source as an intermediate of this opcode so later consumers
            // see the merge point correctly.
            let container = state.pop();
            record_consumer(sources, container, 1, true);
            state.push(ValueWithSource::new(container.value, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::GetIter => {
            let v = state.pop();
            record_consumer(sources, v, 0, true);
            let result = v.value.iter_result();
            state.push(ValueWithSource::new(result, sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::ForIter => {
            // Two successors: fall-through (iterator yielded, one value
            // pushed) and jump-target (iterator exhausted, the iterator
            // itself is popped).
            let iterator = *state.peek(0).expect("FOR_ITER requires an iterator on the stack");
            record_consumer(sources, iterator, 0, true);

            let mut fallthrough_state = state.clone();
            fallthrough_state.push(ValueWithSource::new(AbstractValue::any(), sources.alloc(Origin::Opcode(pc))));

            let mut exhausted_state = state.clone();
            exhausted_state.pop();

            let target = inst.oparg as usize;
            let fallthrough = instruction::next_pc(instructions, code.bytecode().len(), pc);
            Ok(StepOutcome::Branch(vec![(fallthrough, fallthrough_state), (target, exhausted_state)]))
        }
        Opcode::CallFunction => {
            let argc = inst.oparg;
            for depth in 0..=argc {
                let v = state.pop();
                record_consumer(sources, v, u16::try_from(depth).unwrap_or(u16::MAX), true);
            }
            state.push(ValueWithSource::new(AbstractValue::any(), sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::ImportFrom => {
            let module = *state.peek(0).expect("IMPORT_FROM requires a module on the stack");
            record_consumer(sources, module, 0, true);
            state.push(ValueWithSource::new(AbstractValue::any(), sources.alloc(Origin::Opcode(pc))));
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::PopTop => {
            let v = state.pop();
            record_consumer(sources, v, 0, true);
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::DupTop => {
            let v = *state.peek(0).expect("DUP_TOP requires a value on the stack");
            state.push(v);
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::RotTwo => {
            let a = state.pop();
            let b = state.pop();
            state.push(a);
            state.push(b);
            Ok(StepOutcome::Fallthrough)
        }
        Opcode::JumpAbsolute => Ok(StepOutcome::Branch(vec![(inst.oparg as usize, state.clone())])),
        Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
            let v = state.pop();
            record_consumer(sources, v, 0, true);
            let target = inst.oparg as usize;
            let fallthrough_pc = instruction::next_pc(instructions, code.bytecode().len(), pc);
            let fallthrough = state.clone();
            let taken = state.clone();
            Ok(StepOutcome::Branch(vec![(fallthrough_pc, fallthrough), (target, taken)]))
        }
        Opcode::BreakLoop | Opcode::ContinueLoop => Ok(StepOutcome::Branch(vec![(inst.oparg as usize, state.clone())])),
        Opcode::SetupFinally | Opcode::SetupExcept | Opcode::PopBlock => Ok(StepOutcome::Fallthrough),
        Opcode::RaiseVarargs => {
            for depth in 0..inst.oparg {
                let v = state.pop();
                record_consumer(sources, v, u16::try_from(depth).unwrap_or(u16::MAX), true);
            }
            Ok(StepOutcome::Terminal)
        }
        Opcode::ReturnValue => {
            let v = state.pop();
            record_consumer(sources, v, 0, true);
            *return_kind = crate::value::merge(*return_kind, v.value);
            Ok(StepOutcome::Terminal)
        }
        Opcode::ExtendedArg => {
            unreachable!("decode() never emits a standalone EXTENDED_ARG instruction")
        }
        _ => Ok(StepOutcome::Fallthrough),
    }
}

fn update_start_state(
    states: &mut AHashMap<usize, InterpreterState>,
    target: usize,
    incoming: &mut InterpreterState,
    sources: &mut SourceArena,
) -> Result<bool, CompileError> {
    match states.get_mut(&target) {
        None => {
            states.insert(target, incoming.clone());
            Ok(true)
        }
        Some(existing) => existing.merge_in(incoming, sources).map_err(CompileError::from),
    }
}
