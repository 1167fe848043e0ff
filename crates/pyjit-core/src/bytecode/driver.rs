//! Bytecode-to-IL driver (spec §4.5).
//!
//! Walks the analyser's converged instruction stream in ascending pc order,
//! emitting through the [`Emitter`] façade. Threads a compile-time
//! [`BlockStack`]/[`HandlerArena`] in lockstep with emission, and keeps a
//! shadow stack of IL locals mirroring the analyser's abstract stack so
//! values survive across control-flow joins.
//!
//! Every live abstract-stack entry is backed by its own [`LocalId`], typed
//! `I64` when the instruction graph says its producer computed it unboxed,
//! `ObjectPointer` otherwise. Box/unbox conversions are inserted exactly at
//! the edges the graph paints, never speculatively. At any pc reachable
//! from more than one place in the stream, the live entries are spilled
//! into a target-specific set of always-boxed locals before the jump and
//! reloaded from them when the label is marked — control-flow joins always
//! see boxed values, matching the instruction graph's own rule that a
//! `Merge` source is never eligible for unboxing.

use ahash::AHashMap;

use crate::{
    block::{BlockFlags, BlockInfo, BlockKind, BlockStack, HandlerArena, HandlerId},
    budget::{BudgetTracker, CompileBudget},
    bytecode::{analyzer::AnalysisResult, code::CodeObject, graph::InstructionGraph, op::Opcode},
    error::{CompileError, MalformedReason},
    il::{
        emitter::{BranchKind, Emitter, Label, LocalId, MachineOp, MachineType},
        token::{self, WellKnownHelper},
    },
    source::SourceId,
    tracer::CompileTracer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StackKind {
    /// A raw machine `i64` sitting in an `I64`-typed local.
    Value,
    /// A refcount-bearing pointer sitting in an `ObjectPointer`-typed local.
    Object,
}

#[derive(Debug, Clone, Copy)]
struct ShadowSlot {
    local: LocalId,
    kind: StackKind,
}

/// Drives one function's emission to completion, or aborts with a
/// compile-time fatal error on malformed bytecode.
pub struct Driver<'a, E: Emitter, Tr: CompileTracer> {
    code: &'a CodeObject,
    analysis: &'a AnalysisResult,
    graph: &'a InstructionGraph,
    emitter: E,
    tracer: Tr,
    labels: AHashMap<usize, Label>,
    /// Python local-variable slot -> its backing IL local. Always
    /// `ObjectPointer`-typed: this core defers unboxed locals (spec §4.3,
    /// "excluding LOAD_FAST/STORE_FAST").
    python_locals: AHashMap<u16, LocalId>,
    /// Per-target-pc set of boxed locals a control-flow join reloads from.
    join_locals: AHashMap<usize, Vec<LocalId>>,
    /// Which `HandlerId` owns the entry at a given handler pc, so the
    /// driver knows which protection level to restore once inside the
    /// handler body.
    handler_entries: AHashMap<usize, HandlerId>,
    shadow: Vec<ShadowSlot>,
    blocks: BlockStack,
    handlers: HandlerArena,
    current_handler: Option<HandlerId>,
    epilogue_rethrow: Label,
    /// Raise-and-free link requests collected during emission and flushed
    /// in one pass at the end of `drive`, so marking a chain link's label
    /// never falls in the middle of the normal-path instruction stream.
    pending_raise_tails: Vec<(HandlerId, usize, Label)>,
}

impl<'a, E: Emitter, Tr: CompileTracer> Driver<'a, E, Tr> {
    #[must_use]
    pub fn new(code: &'a CodeObject, analysis: &'a AnalysisResult, graph: &'a InstructionGraph, mut emitter: E, tracer: Tr) -> Self {
        let epilogue_rethrow = emitter.define_label();
        Self {
            code,
            analysis,
            graph,
            emitter,
            tracer,
            labels: AHashMap::default(),
            python_locals: AHashMap::default(),
            join_locals: AHashMap::default(),
            handler_entries: AHashMap::default(),
            shadow: Vec::new(),
            blocks: BlockStack::new(),
            handlers: HandlerArena::new(),
            current_handler: None,
            epilogue_rethrow,
            pending_raise_tails: Vec::new(),
        }
    }

    /// Runs emission to completion, returning the backend (still
    /// un-finalized: the caller calls `Emitter::compile` to lower it).
    ///
    /// # Errors
    /// `CompileError::Malformed` for broken block nesting; `CompileError::
    /// BudgetExceeded` if `budget`'s IL instruction limit is exceeded.
    pub fn drive(mut self, budget: &CompileBudget) -> Result<E, CompileError> {
        let mut budget_tracker = BudgetTracker::new();

        for slot in 0..self.code.arg_count() {
            let local = self.emitter.define_local(MachineType::ObjectPointer);
            self.python_locals.insert(slot, local);
        }

        let mut pcs: Vec<usize> = self.analysis.instructions().keys().copied().collect();
        pcs.sort_unstable();

        for &pc in &pcs {
            if self.analysis.jump_targets().contains(&pc) {
                self.labels.entry(pc).or_insert_with(|| self.emitter.define_label());
            }
        }

        for (&handler_pc, &setup_pc) in self.analysis.block_starts() {
            let _ = setup_pc;
            self.labels.entry(handler_pc).or_insert_with(|| self.emitter.define_label());
        }

        for &pc in &pcs {
            if let Some(&label) = self.labels.get(&pc) {
                self.emitter.mark_label(label);
                self.reconcile_join(pc);
                if let Some(&id) = self.handler_entries.get(&pc) {
                    self.current_handler = self.handlers.get(id).parent;
                    self.push_exception_triple();
                }
            }
            self.emit_opcode(pc, budget, &mut budget_tracker)?;
        }

        self.flush_raise_tails();

        self.emitter.mark_label(self.epilogue_rethrow);
        self.emitter.ld_i4(0);
        self.emitter.ret();

        Ok(self.emitter)
    }

    fn next_pc(&self, pc: usize) -> usize {
        crate::bytecode::instruction::next_pc(self.analysis.instructions(), self.code.bytecode().len(), pc)
    }

    fn inst(&self, pc: usize) -> crate::bytecode::instruction::Instruction {
        self.analysis.instructions()[&pc]
    }

    // ---- shadow-stack plumbing ----------------------------------------

    fn push_value_slot(&mut self, local: LocalId) {
        self.shadow.push(ShadowSlot { local, kind: StackKind::Value });
    }

    fn push_object_slot(&mut self, local: LocalId) {
        self.shadow.push(ShadowSlot { local, kind: StackKind::Object });
    }

    fn pop_slot(&mut self) -> ShadowSlot {
        self.shadow.pop().expect("analyser guarantees a value is present")
    }

    /// Emits a `BOX_INT` conversion on whatever slot is currently loaded on
    /// the IL stack, if it's unboxed. Leaves an `ObjectPointer` on the IL
    /// stack either way.
    fn materialize_boxed(&mut self, slot: ShadowSlot) {
        self.emitter.ld_loc(slot.local);
        if slot.kind == StackKind::Value {
            self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
        }
    }

    /// Pops an operand for a non-whitelisted consumer: always surfaces as
    /// `ObjectPointer` on the IL stack (boxing it first if its producer
    /// left it unboxed).
    fn pop_boxed(&mut self) -> LocalId {
        let slot = self.pop_slot();
        self.materialize_boxed(slot);
        let local = self.emitter.define_local(MachineType::ObjectPointer);
        self.emitter.st_loc(local);
        local
    }

    /// Pops an operand for a whitelisted (arithmetic/compare) consumer.
    /// Fetches it raw (`I64`) if its producer left it unboxed, else unboxes
    /// it through the registered `UnboxInt` helper — the instruction graph
    /// never routes an `Unbox` edge into a kind this core can't unbox.
    fn pop_unboxed(&mut self) -> LocalId {
        let slot = self.pop_slot();
        self.emitter.ld_loc(slot.local);
        if slot.kind == StackKind::Object {
            self.emitter.emit_call(token::registry().token_for(WellKnownHelper::UnboxInt));
        }
        let local = self.emitter.define_local(MachineType::I64);
        self.emitter.st_loc(local);
        local
    }

    fn error_check(&mut self) {
        let depth = self.shadow.len();
        let target = self.raise_target(depth);
        self.emitter.ld_i4(0);
        self.emitter.branch(BranchKind::Equal, target);
    }

    fn emit_helper_call(&mut self, helper: WellKnownHelper, fallible: bool) -> LocalId {
        self.emitter.emit_call(token::registry().token_for(helper));
        let local = self.emitter.define_local(MachineType::ObjectPointer);
        self.emitter.st_loc(local);
        if fallible {
            self.emitter.ld_loc(local);
            self.error_check();
        }
        local
    }

    fn join_locals_for(&mut self, target: usize) -> Vec<LocalId> {
        if let Some(locals) = self.join_locals.get(&target) {
            return locals.clone();
        }
        let depth = self.analysis.state_before(target).map_or(0, |s| s.stack().len());
        let locals: Vec<LocalId> = (0..depth).map(|_| self.emitter.define_local(MachineType::ObjectPointer)).collect();
        self.join_locals.insert(target, locals.clone());
        locals
    }

    /// Spills the live shadow stack into `target`'s join locals (boxing any
    /// unboxed entry) immediately before branching or falling through to
    /// it.
    fn spill_to(&mut self, target: usize) {
        let locals = self.join_locals_for(target);
        let slots = self.shadow.clone();
        for (slot, &local) in slots.iter().zip(locals.iter()) {
            self.materialize_boxed(*slot);
            self.emitter.st_loc(local);
        }
    }

    /// When `pc` is a label (reached from more than one emission point),
    /// reloads the shadow stack from its join locals.
    fn reconcile_join(&mut self, pc: usize) {
        if let Some(locals) = self.join_locals.get(&pc) {
            self.shadow = locals.iter().map(|&local| ShadowSlot { local, kind: StackKind::Object }).collect();
        }
    }

    fn push_exception_triple(&mut self) {
        for _ in 0..3 {
            let local = self.emitter.define_local(MachineType::ObjectPointer);
            self.push_object_slot(local);
        }
    }

    // ---- exception handling --------------------------------------------

    /// Builds (lazily, on first need) the raise-and-free chain link for
    /// `depth` under the current handler, or the function epilogue if
    /// there is none, and returns the label to branch to.
    ///
    /// The label's body (the actual `branch(Always, ...)` trampoline into
    /// the handler, or into the next link down) is not emitted here: doing
    /// so at the point of first request would mark the label mid-stream,
    /// and everything emitted afterwards for the normal path would fall
    /// straight into a block that unconditionally branches away. Instead
    /// the request is queued in `pending_raise_tails` and every queued
    /// link is flushed once, after the main per-pc loop finishes.
    fn raise_target(&mut self, depth: usize) -> Label {
        let Some(id) = self.current_handler else { return self.epilogue_rethrow };
        if let Some(label) = self.handlers.get(id).raise_and_free.label_for_depth(depth) {
            return label;
        }
        let k = self.handlers.get(id).raise_and_free.len();
        debug_assert_eq!(k, depth, "raise_target requested out of depth order");
        let label = self.emitter.define_label();
        self.handlers.get_mut(id).raise_and_free.push(label);
        self.pending_raise_tails.push((id, depth, label));
        label
    }

    /// Emits the body of every queued raise-and-free chain link: marks the
    /// label, then branches into the handler entry (depth 0) or the next
    /// link down (depth > 0).
    fn flush_raise_tails(&mut self) {
        let pending = std::mem::take(&mut self.pending_raise_tails);
        for (id, depth, label) in pending {
            let fall_into = if depth == 0 {
                self.handlers.get(id).entry
            } else {
                self.handlers.get(id).raise_and_free.label_for_depth(depth - 1).expect("built in order")
            };
            self.emitter.mark_label(label);
            self.emitter.branch(BranchKind::Always, fall_into);
        }
    }

    fn setup_handler(&mut self, handler_pc: usize) {
        let entry = self.labels[&handler_pc];
        let id = self.handlers.alloc(entry, self.current_handler);
        self.handler_entries.insert(handler_pc, id);
        self.blocks.push(BlockInfo {
            end_offset: handler_pc,
            kind: BlockKind::Try,
            continue_offset: None,
            current_handler: Some(id),
            flags: BlockFlags::HAS_HANDLER,
        });
        self.current_handler = Some(id);
        self.tracer.on_block_stack_changed(self.blocks.depth());
    }

    fn pop_block(&mut self) -> Result<(), CompileError> {
        let popped = self
            .blocks
            .pop_block()
            .map_err(|_| CompileError::Malformed { reason: MalformedReason::BrokenBlockNesting, pc: None })?;
        self.current_handler = popped.current_handler.and_then(|id| self.handlers.get(id).parent);
        self.tracer.on_block_stack_changed(self.blocks.depth());
        Ok(())
    }

    fn free_to_loop_and_branch(&mut self, target: usize) -> Result<(), CompileError> {
        // Free every live for-iter value between here and the nearest
        // enclosing loop by folding it into the ordinary join spill below;
        // this core keeps loop iterators on the general shadow stack
        // rather than a separate loop-local table.
        let _ = self.blocks.blocks_to_nearest_loop();
        self.spill_to(target);
        self.emitter.branch(BranchKind::Always, self.labels[&target]);
        Ok(())
    }

    // ---- per-opcode emission --------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn emit_opcode(&mut self, pc: usize, budget: &CompileBudget, budget_tracker: &mut BudgetTracker) -> Result<(), CompileError> {
        let inst = self.inst(pc);
        budget_tracker.on_il_instruction_emitted(budget)?;

        match inst.opcode {
            Opcode::LoadConst => {
                let source_id = self.pushed_source_id(pc);
                let kind = self.code.const_at(inst.oparg).kind();
                let unbox = source_id.is_some_and(|id| !self.graph.const_escapes(id)) && crate::bytecode::op::supports_escaping(kind);
                if unbox {
                    let local = self.emitter.define_local(MachineType::I64);
                    match self.code.const_at(inst.oparg) {
                        crate::bytecode::code::ConstValue::Int(v) => self.emitter.ld_i8(*v),
                        crate::bytecode::code::ConstValue::Float(v) => self.emitter.ld_r8(*v),
                        crate::bytecode::code::ConstValue::Bool(v) => self.emitter.ld_i8(i64::from(*v)),
                        _ => unreachable!("supports_escaping only admits Int/Float/Bool"),
                    }
                    self.emitter.st_loc(local);
                    self.push_value_slot(local);
                } else {
                    let local = self.emitter.define_local(MachineType::ObjectPointer);
                    self.emit_const_load(inst.oparg);
                    self.emitter.st_loc(local);
                    self.push_object_slot(local);
                }
            }
            Opcode::LoadFast => {
                let local = *self.python_locals.get(&u16::try_from(inst.oparg).unwrap_or(u16::MAX)).expect("assigned local");
                let dup = self.emitter.define_local(MachineType::ObjectPointer);
                self.emitter.ld_loc(local);
                self.emitter.st_loc(dup);
                self.push_object_slot(dup);
            }
            Opcode::StoreFast => {
                let value = self.pop_boxed();
                let slot = u16::try_from(inst.oparg).unwrap_or(u16::MAX);
                let local = *self.python_locals.entry(slot).or_insert_with(|| self.emitter.define_local(MachineType::ObjectPointer));
                self.emitter.ld_loc(value);
                self.emitter.st_loc(local);
            }
            Opcode::DeleteFast => {}
            Opcode::LoadGlobal => {
                self.emitter.ld_u4(inst.oparg);
                let local = self.emit_helper_call(WellKnownHelper::LoadGlobal, true);
                self.push_object_slot(local);
            }
            Opcode::LoadAssertionError => {
                let local = self.emit_helper_call(WellKnownHelper::LoadAssertionError, false);
                self.push_object_slot(local);
            }
            Opcode::BinaryAdd
            | Opcode::BinarySubtract
            | Opcode::BinaryMultiply
            | Opcode::BinaryFloorDivide
            | Opcode::BinaryModulo
            | Opcode::BinaryLshift
            | Opcode::BinaryRshift
            | Opcode::BinaryAnd
            | Opcode::BinaryOr
            | Opcode::BinaryXor
            | Opcode::UnaryNegative
            | Opcode::UnaryInvert => {
                self.emit_arith(pc, inst)?;
            }
            Opcode::UnaryPositive => {
                let a = self.pop_boxed();
                self.emitter.ld_loc(a);
                self.emitter.ld_u4(u32::from(inst.opcode.as_u8()));
                let local = self.emit_helper_call(WellKnownHelper::UnaryOp, true);
                self.push_object_slot(local);
            }
            Opcode::CompareOp => {
                let b = self.pop_boxed();
                let a = self.pop_boxed();
                self.emitter.ld_loc(a);
                self.emitter.ld_loc(b);
                self.emitter.ld_u4(inst.oparg);
                let local = self.emit_helper_call(WellKnownHelper::CompareOp, true);
                self.push_object_slot(local);
            }
            Opcode::BinaryTrueDivide | Opcode::BinaryPower => {
                let b = self.pop_boxed();
                let a = self.pop_boxed();
                self.emitter.ld_loc(a);
                self.emitter.ld_loc(b);
                self.emitter.ld_u4(u32::from(inst.opcode.as_u8()));
                let local = self.emit_helper_call(WellKnownHelper::BinaryOp, true);
                self.push_object_slot(local);
            }
            Opcode::UnaryNot => {
                let a = self.pop_boxed();
                self.emitter.ld_loc(a);
                self.emitter.ld_u4(u32::from(inst.opcode.as_u8()));
                let local = self.emit_helper_call(WellKnownHelper::UnaryOp, true);
                self.push_object_slot(local);
            }
            Opcode::ContainsOp => {
                let b = self.pop_boxed();
                let a = self.pop_boxed();
                self.emitter.ld_loc(b);
                self.emitter.ld_loc(a);
                let local = self.emit_helper_call(WellKnownHelper::ContainsOp, true);
                self.push_object_slot(local);
            }
            Opcode::BinarySubscr => {
                let index = self.pop_boxed();
                let container = self.pop_boxed();
                self.emitter.ld_loc(container);
                self.emitter.ld_loc(index);
                let local = self.emit_helper_call(WellKnownHelper::Subscript, true);
                self.push_object_slot(local);
            }
            Opcode::BuildSlice => {
                let step = self.pop_boxed();
                let stop = self.pop_boxed();
                let start = self.pop_boxed();
                self.emitter.ld_loc(start);
                self.emitter.ld_loc(stop);
                self.emitter.ld_loc(step);
                let local = self.emit_helper_call(WellKnownHelper::BuildSlice, true);
                self.push_object_slot(local);
            }
            Opcode::BuildList | Opcode::BuildTuple | Opcode::BuildSet | Opcode::BuildMap => {
                let per_item = u32::from(inst.opcode == Opcode::BuildMap) + 1;
                let count = inst.oparg * per_item;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(self.pop_boxed());
                }
                for item in items.into_iter().rev() {
                    self.emitter.ld_loc(item);
                }
                self.emitter.ld_u4(inst.oparg);
                let helper = match inst.opcode {
                    Opcode::BuildList => WellKnownHelper::BuildList,
                    Opcode::BuildTuple => WellKnownHelper::BuildTuple,
                    Opcode::BuildSet => WellKnownHelper::BuildSet,
                    _ => WellKnownHelper::BuildMap,
                };
                let local = self.emit_helper_call(helper, true);
                self.push_object_slot(local);
            }
            Opcode::ListExtend | Opcode::DictUpdate => {
                let iterable = self.pop_boxed();
                let container = self.pop_boxed();
                self.emitter.ld_loc(container);
                self.emitter.ld_loc(iterable);
                let helper = if inst.opcode == Opcode::ListExtend { WellKnownHelper::ListExtend } else { WellKnownHelper::DictUpdate };
                self.emitter.emit_call(token::registry().token_for(helper));
                self.push_object_slot(container);
            }
            Opcode::GetIter => {
                let v = self.pop_boxed();
                self.emitter.ld_loc(v);
                let local = self.emit_helper_call(WellKnownHelper::GetIter, true);
                self.push_object_slot(local);
            }
            Opcode::ForIter => {
                let iterator = *self.shadow.last().expect("FOR_ITER requires an iterator");
                self.materialize_boxed(iterator);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::IterNext));
                let result = self.emitter.define_local(MachineType::ObjectPointer);
                self.emitter.st_loc(result);
                let exhausted = self.labels[&(inst.oparg as usize)];
                self.emitter.ld_loc(result);
                self.emitter.ld_i4(0);
                self.emitter.branch(BranchKind::Equal, exhausted);
                self.push_object_slot(result);
                let fallthrough = self.next_pc(pc);
                if self.labels.contains_key(&fallthrough) {
                    self.spill_to(fallthrough);
                }
            }
            Opcode::CallFunction => {
                let argc = inst.oparg;
                let mut args = Vec::with_capacity(argc as usize);
                for _ in 0..argc {
                    args.push(self.pop_boxed());
                }
                let callable = self.pop_boxed();
                self.emitter.ld_loc(callable);
                for arg in args.into_iter().rev() {
                    self.emitter.ld_loc(arg);
                }
                self.emitter.ld_u4(argc);
                let local = self.emit_helper_call(WellKnownHelper::CallFunction, true);
                self.push_object_slot(local);
            }
            Opcode::ImportFrom => {
                let module = *self.shadow.last().expect("IMPORT_FROM requires a module");
                self.materialize_boxed(module);
                self.emitter.ld_u4(inst.oparg);
                let local = self.emit_helper_call(WellKnownHelper::ImportFrom, true);
                self.push_object_slot(local);
            }
            Opcode::PopTop => {
                self.pop_slot();
            }
            Opcode::DupTop => {
                let top = *self.shadow.last().expect("DUP_TOP requires a value");
                self.shadow.push(top);
            }
            Opcode::RotTwo => {
                let a = self.pop_slot();
                let b = self.pop_slot();
                self.shadow.push(a);
                self.shadow.push(b);
            }
            Opcode::JumpAbsolute => {
                let target = inst.oparg as usize;
                self.spill_to(target);
                self.emitter.branch(BranchKind::Always, self.labels[&target]);
            }
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let cond = self.pop_boxed();
                // `BranchKind::True`/`False` branch on a machine boolean,
                // not an arbitrary boxed pointer; convert via Python
                // truthiness first and stash the result, since `spill_to`
                // below emits its own IL and can't run with a value still
                // sitting mid-evaluation on the IL stack.
                self.emitter.ld_loc(cond);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::Truthy));
                let truthy = self.emitter.define_local(MachineType::I32);
                self.emitter.st_loc(truthy);

                let target = inst.oparg as usize;
                let fallthrough = self.next_pc(pc);
                let taken_kind = if matches!(inst.opcode, Opcode::PopJumpIfTrue | Opcode::JumpIfTrue) { BranchKind::True } else { BranchKind::False };
                // Spill before the taken branch; the fallthrough side only
                // needs a spill (and an explicit jump) if it is itself a
                // label some other edge also reaches.
                self.spill_to(target);
                self.emitter.ld_loc(truthy);
                self.emitter.branch(taken_kind, self.labels[&target]);
                if self.labels.contains_key(&fallthrough) {
                    self.spill_to(fallthrough);
                    self.emitter.branch(BranchKind::Always, self.labels[&fallthrough]);
                }
            }
            Opcode::BreakLoop | Opcode::ContinueLoop => {
                self.free_to_loop_and_branch(inst.oparg as usize)?;
            }
            Opcode::SetupFinally | Opcode::SetupExcept => {
                self.setup_handler(inst.oparg as usize);
            }
            Opcode::PopBlock => {
                self.pop_block()?;
            }
            Opcode::RaiseVarargs => {
                for _ in 0..inst.oparg {
                    self.pop_boxed();
                }
                let depth = self.shadow.len();
                let target = self.raise_target(depth);
                self.emitter.branch(BranchKind::Always, target);
            }
            Opcode::ReturnValue => {
                let v = self.pop_boxed();
                self.emitter.ld_loc(v);
                self.emitter.ret();
            }
            Opcode::ExtendedArg => unreachable!("decode() never emits a standalone EXTENDED_ARG instruction"),
        }

        // FOR_ITER spills its own fallthrough successor above (it has two
        // successors, handled entirely inside its own arm); every other
        // opcode either always branches/terminates or always falls
        // through, so a plain negative check covers the rest.
        let always_branches_or_terminates = matches!(
            inst.opcode,
            Opcode::JumpAbsolute
                | Opcode::PopJumpIfFalse
                | Opcode::PopJumpIfTrue
                | Opcode::JumpIfFalse
                | Opcode::JumpIfTrue
                | Opcode::BreakLoop
                | Opcode::ContinueLoop
                | Opcode::RaiseVarargs
                | Opcode::ReturnValue
                | Opcode::ForIter
                | Opcode::ExtendedArg
        );
        if !always_branches_or_terminates {
            let fallthrough = self.next_pc(pc);
            if self.labels.contains_key(&fallthrough) {
                self.spill_to(fallthrough);
            }
        }

        Ok(())
    }

    fn pushed_source_id(&self, load_const_pc: usize) -> Option<SourceId> {
        let after = self.analysis.state_before(self.next_pc(load_const_pc))?;
        after.stack().last()?.source
    }

    /// Boxes a constant that stays boxed (either because the graph decided
    /// against unboxing it, or because its kind never supports unboxing).
    ///
    /// Numeric constants (`Int`/`Float`/`Bool`) go through `BoxInt`, the
    /// same helper arithmetic results use. Everything else (`Str`, `Bytes`,
    /// `None`, `Ellipsis`, `Code`, `Tuple`) is already a boxed object sitting
    /// in the host's constant pool by the time this core sees it — there is
    /// no machine-level representation to build it from, so the driver asks
    /// the host for a pointer to that pool slot instead of fabricating one.
    fn emit_const_load(&mut self, oparg: u32) {
        match self.code.const_at(oparg) {
            crate::bytecode::code::ConstValue::Int(v) => {
                if let Ok(v) = i32::try_from(*v) {
                    self.emitter.ld_i4(v);
                } else {
                    self.emitter.ld_i8(*v);
                }
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
            }
            crate::bytecode::code::ConstValue::Float(v) => {
                self.emitter.ld_r8(*v);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
            }
            crate::bytecode::code::ConstValue::Bool(v) => {
                self.emitter.ld_i4(i32::from(*v));
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
            }
            crate::bytecode::code::ConstValue::Str(_)
            | crate::bytecode::code::ConstValue::Bytes(_)
            | crate::bytecode::code::ConstValue::None
            | crate::bytecode::code::ConstValue::Ellipsis
            | crate::bytecode::code::ConstValue::Code
            | crate::bytecode::code::ConstValue::Tuple(_) => {
                self.emitter.ld_u4(oparg);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::ConstPoolGet));
            }
        }
    }

    fn emit_arith(&mut self, pc: usize, inst: crate::bytecode::instruction::Instruction) -> Result<(), CompileError> {
        let escapes = self.graph.escapes(pc);
        if let Some(op) = binary_helper_for(inst.opcode) {
            let b = self.pop_unboxed();
            let a = self.pop_unboxed();
            self.emitter.ld_loc(a);
            self.emitter.ld_loc(b);
            self.emitter.machine_op(op);
            let raw = self.emitter.define_local(MachineType::I64);
            self.emitter.st_loc(raw);
            if escapes {
                self.emitter.ld_loc(raw);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
                let boxed = self.emitter.define_local(MachineType::ObjectPointer);
                self.emitter.st_loc(boxed);
                self.push_object_slot(boxed);
            } else {
                self.push_value_slot(raw);
            }
        } else if let Some(op) = unary_helper_for(inst.opcode) {
            let a = self.pop_unboxed();
            self.emitter.ld_loc(a);
            self.emitter.machine_op(op);
            let raw = self.emitter.define_local(MachineType::I64);
            self.emitter.st_loc(raw);
            if escapes {
                self.emitter.ld_loc(raw);
                self.emitter.emit_call(token::registry().token_for(WellKnownHelper::BoxInt));
                let boxed = self.emitter.define_local(MachineType::ObjectPointer);
                self.emitter.st_loc(boxed);
                self.push_object_slot(boxed);
            } else {
                self.push_value_slot(raw);
            }
        }
        Ok(())
    }
}

fn binary_helper_for(opcode: Opcode) -> Option<MachineOp> {
    Some(match opcode {
        Opcode::BinaryAdd => MachineOp::Add,
        Opcode::BinarySubtract => MachineOp::Sub,
        Opcode::BinaryMultiply => MachineOp::Mul,
        Opcode::BinaryFloorDivide => MachineOp::Div,
        Opcode::BinaryModulo => MachineOp::Mod,
        Opcode::BinaryLshift => MachineOp::LShift,
        Opcode::BinaryRshift => MachineOp::RShift,
        Opcode::BinaryAnd => MachineOp::And,
        Opcode::BinaryOr => MachineOp::Or,
        Opcode::BinaryXor => MachineOp::Xor,
        _ => return None,
    })
}

fn unary_helper_for(opcode: Opcode) -> Option<MachineOp> {
    Some(match opcode {
        Opcode::UnaryNegative => MachineOp::Neg,
        Opcode::UnaryInvert => MachineOp::Not,
        _ => return None,
    })
}
