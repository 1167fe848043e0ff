//! Instruction dependency graph: escape analysis and box/unbox edge
//! painting (spec §4.3).
//!
//! Built after the analyser converges. Walks every [`crate::source::Source`]
//! the analyser recorded and decides, per producer, whether its result may
//! travel unboxed, then paints each producer→consumer edge with the
//! conversion (if any) the driver must insert.

use ahash::AHashMap;

use crate::{
    bytecode::{analyzer::AnalysisResult, op::Opcode},
    source::{Origin, SourceArena, SourceId},
    tracer::CompileTracer,
    value::Kind,
};

/// The conversion (if any) the driver must insert at one producer→consumer
/// edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Both sides treat this value boxed; no conversion (the status quo).
    NoEscape,
    /// Producer's value is boxed; this consumer wants it unboxed.
    Unbox,
    /// Both sides treat this value unboxed; no conversion.
    Unboxed,
    /// Producer computed an unboxed value; this consumer needs it boxed.
    Box,
}

/// The escape decision for every producer source, and the per-edge
/// conversions that follow from it.
#[derive(Debug, Clone, Default)]
pub struct InstructionGraph {
    /// Final escape decision (`true` = boxed) for every `Origin::Opcode`
    /// producer, keyed by its pc. Constants, locals, and merges are never
    /// queried here directly (they have a fixed or derived policy) but
    /// still participate in edge painting.
    escape: AHashMap<usize, bool>,
    /// Escape decision for every `Origin::Constant` source, keyed by its id
    /// rather than a pc (constants have none of their own to key on). Never
    /// revisited by `deoptimize_instructions`: producing either
    /// representation of a literal is equally cheap, so there's nothing to
    /// trade off the way there is for a computed value.
    const_escape: AHashMap<SourceId, bool>,
    edges_by_consumer: AHashMap<(usize, u16), EdgeKind>,
}

impl InstructionGraph {
    /// Runs `fix_instructions` then `deoptimize_instructions` (single pass,
    /// or to a fixpoint if `to_fixpoint`), then `fix_edges`.
    #[must_use]
    pub fn build(analysis: &AnalysisResult, tracer: &mut impl CompileTracer, to_fixpoint: bool) -> Self {
        let arena = analysis.sources();
        let mut escape = fix_instructions(analysis, arena, tracer);
        let const_escape = const_escape_decisions(analysis, arena);

        loop {
            let mut edges = paint_edges(analysis, arena, &escape);
            let deoptimized = deoptimize_instructions(analysis, arena, &mut escape, &edges, tracer);
            if !deoptimized {
                let mut edges_by_consumer = AHashMap::default();
                for (source_id, consumer_pc, pos, kind) in edges.drain(..) {
                    let _ = source_id;
                    edges_by_consumer.insert((consumer_pc, pos), kind);
                }
                return Self { escape, const_escape, edges_by_consumer };
            }
            if !to_fixpoint {
                // Single pass: re-paint once more with the deoptimized
                // decisions baked in, then stop regardless of further churn.
                let edges = paint_edges(analysis, arena, &escape);
                let mut edges_by_consumer = AHashMap::default();
                for (_, consumer_pc, pos, kind) in edges {
                    edges_by_consumer.insert((consumer_pc, pos), kind);
                }
                return Self { escape, const_escape, edges_by_consumer };
            }
        }
    }

    #[must_use]
    pub fn escapes(&self, pc: usize) -> bool {
        self.escape.get(&pc).copied().unwrap_or(true)
    }

    /// The escape decision for a `LOAD_CONST`'s pushed value, looked up by
    /// the `SourceId` the analyser allocated for that particular push (not
    /// by pc, since every constant push shares `Origin::Constant`).
    #[must_use]
    pub fn const_escapes(&self, id: SourceId) -> bool {
        self.const_escape.get(&id).copied().unwrap_or(true)
    }

    #[must_use]
    pub fn edge_kind(&self, consumer_pc: usize, stack_pos: u16) -> EdgeKind {
        self.edges_by_consumer.get(&(consumer_pc, stack_pos)).copied().unwrap_or(EdgeKind::NoEscape)
    }
}

fn producer_pc(origin: &Origin) -> Option<usize> {
    match origin {
        Origin::Opcode(pc) => Some(*pc),
        _ => None,
    }
}

/// Whether the origin's own production step can, in principle, hand back an
/// unboxed value (subject to the kind and consumer checks). Only
/// `LOAD_CONST` and the arithmetic/comparison opcodes qualify — locals,
/// synthesized pushes (the exception triple), and control-flow merges never
/// do (merges are resolved purely through edge conversions, see module docs).
fn producer_whitelisted(analysis: &AnalysisResult, origin: &Origin) -> bool {
    match origin {
        Origin::Opcode(pc) => analysis.instructions().get(pc).is_some_and(|i| i.opcode.supports_unboxing()),
        Origin::Constant => Opcode::LoadConst.supports_unboxing(),
        Origin::Local(_) | Origin::Synthetic | Origin::Merge(_) => false,
    }
}

/// Recovers the kind of the value a source carries by looking at how any
/// one of its recorded consumers saw it on the abstract stack. Sources with
/// no recorded consumer (dead values) default to `Any`, the conservative
/// (always-boxed) choice.
fn kind_of_source(analysis: &AnalysisResult, arena: &SourceArena, id: SourceId) -> Kind {
    let source = arena.get(id);
    for (pc, pos) in source.consumers() {
        if let Some(state) = analysis.state_before(pc) {
            let stack = state.stack();
            let pos = pos as usize;
            if pos < stack.len() {
                return stack[stack.len() - 1 - pos].value.kind();
            }
        }
    }
    Kind::Any
}

/// spec §4.3 step 1: the initial, optimistic escape decision per source —
/// purely a function of what the producing opcode and result kind can
/// support, independent of who consumes it. Whether staying unboxed
/// actually pays off, given the consumers this value turned out to have,
/// is `deoptimize_instructions`'s job.
fn fix_instructions(analysis: &AnalysisResult, arena: &SourceArena, tracer: &mut impl CompileTracer) -> AHashMap<usize, bool> {
    let mut escape = AHashMap::default();
    for id in arena.ids() {
        let source = arena.get(id);
        let Some(pc) = producer_pc(source.origin()) else { continue };
        let whitelisted = producer_whitelisted(analysis, source.origin());
        let escapable_kind = crate::bytecode::op::supports_escaping(kind_of_source(analysis, arena, id));
        let decision = !(whitelisted && escapable_kind);
        if let Some(inst) = analysis.instructions().get(&pc) {
            tracer.on_escape_decided(pc, inst.opcode, decision);
        }
        escape.insert(pc, decision);
    }
    escape
}

/// Whether `consumer_pc`'s opcode treats its stack operands as unboxing
/// candidates at all. Mirrors `producer_whitelisted`'s logic but from the
/// consumer's side of an edge.
fn consumer_wants_unboxed(analysis: &AnalysisResult, consumer_pc: usize) -> bool {
    analysis.instructions().get(&consumer_pc).is_some_and(|i| i.opcode.supports_unboxing())
}

fn edge_kind_for(producer_escapes: bool, consumer_wants_unboxed: bool) -> EdgeKind {
    match (producer_escapes, consumer_wants_unboxed) {
        (false, true) => EdgeKind::Unboxed,
        (false, false) => EdgeKind::Box,
        (true, true) => EdgeKind::Unbox,
        (true, false) => EdgeKind::NoEscape,
    }
}

/// Whether `id`'s producer currently escapes, looked up by origin kind:
/// `Origin::Opcode`/`Origin::Constant` consult `escape`-by-pc (constants
/// always resolve to the `LOAD_CONST` whitelist decision, which has no pc
/// of its own to key on, so constants are looked up by id instead); every
/// other origin is always boxed.
fn source_escapes(arena: &SourceArena, id: SourceId, escape: &AHashMap<usize, bool>, const_escape: &AHashMap<SourceId, bool>) -> bool {
    match arena.get(id).origin() {
        Origin::Opcode(pc) => escape.get(pc).copied().unwrap_or(true),
        Origin::Constant => const_escape.get(&id).copied().unwrap_or(true),
        Origin::Local(_) | Origin::Synthetic | Origin::Merge(_) => true,
    }
}

/// spec §4.3 step 3: paints every producer→consumer edge with its
/// conversion. Returns `(source_id, consumer_pc, stack_position, kind)`
/// tuples rather than writing straight into a map so the deoptimization
/// pass can inspect them before they're finalized.
fn paint_edges(analysis: &AnalysisResult, arena: &SourceArena, escape: &AHashMap<usize, bool>) -> Vec<(SourceId, usize, u16, EdgeKind)> {
    let const_escape = const_escape_decisions(analysis, arena);
    let mut edges = Vec::new();
    for id in arena.ids() {
        let producer_escapes = source_escapes(arena, id, escape, &const_escape);
        for (consumer_pc, pos) in arena.get(id).consumers() {
            let wants_unboxed = consumer_wants_unboxed(analysis, consumer_pc);
            edges.push((id, consumer_pc, pos, edge_kind_for(producer_escapes, wants_unboxed)));
        }
    }
    edges
}

/// Constants don't have a producer pc to key `escape` on (the pc belongs to
/// the `LOAD_CONST` that pushed them, which is shared with no other
/// source), so their escape decision is tracked separately, by id, using
/// the same whitelist-and-kind rule as any other source.
fn const_escape_decisions(analysis: &AnalysisResult, arena: &SourceArena) -> AHashMap<SourceId, bool> {
    let mut decisions = AHashMap::default();
    for id in arena.ids() {
        if !matches!(arena.get(id).origin(), Origin::Constant) {
            continue;
        }
        let escapable_kind = crate::bytecode::op::supports_escaping(kind_of_source(analysis, arena, id));
        decisions.insert(id, !(Opcode::LoadConst.supports_unboxing() && escapable_kind));
    }
    decisions
}

/// spec §4.3 step 2: reverts an optimistic unboxed decision when the
/// conversions it would force outnumber the edges it saves. Returns whether
/// any producer was deoptimized this pass.
fn deoptimize_instructions(
    analysis: &AnalysisResult,
    arena: &SourceArena,
    escape: &mut AHashMap<usize, bool>,
    edges: &[(SourceId, usize, u16, EdgeKind)],
    tracer: &mut impl CompileTracer,
) -> bool {
    let mut box_counts: AHashMap<usize, usize> = AHashMap::default();
    let mut noescape_counts: AHashMap<usize, usize> = AHashMap::default();

    for &(id, _, _, kind) in edges {
        let Some(pc) = producer_pc(arena.get(id).origin()) else { continue };
        match kind {
            EdgeKind::Box => *box_counts.entry(pc).or_insert(0) += 1,
            EdgeKind::Unboxed => *noescape_counts.entry(pc).or_insert(0) += 1,
            EdgeKind::NoEscape | EdgeKind::Unbox => {}
        }
    }

    let mut changed = false;
    for (&pc, currently_escapes) in escape.iter_mut() {
        if *currently_escapes {
            continue;
        }
        let boxes = box_counts.get(&pc).copied().unwrap_or(0);
        let noescapes = noescape_counts.get(&pc).copied().unwrap_or(0);
        if boxes > noescapes {
            *currently_escapes = true;
            changed = true;
            tracer.on_deoptimized(pc);
            let _ = analysis;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        budget::CompileBudget,
        bytecode::{
            analyzer::Analyzer,
            code::{CodeFlags, CodeObject, ConstValue},
        },
        tracer::NoopTracer,
    };

    fn two_unit(op: Opcode, arg: u32) -> [u8; 2] {
        [op.as_u8(), u8::try_from(arg).unwrap_or(0)]
    }

    #[test]
    fn intermediate_arithmetic_result_stays_unboxed() {
        // return (1 + 2) + 3 -- the inner add's only consumer is the outer
        // add, which is itself unboxing-whitelisted, so the inner add has
        // nothing but NoEscape edges and should stay unboxed. The outer
        // add's only consumer is RETURN_VALUE (never whitelisted), so it
        // gets deoptimized back to boxed.
        let mut bytes = Vec::new();
        bytes.extend(two_unit(Opcode::LoadConst, 0));
        bytes.extend(two_unit(Opcode::LoadConst, 1));
        bytes.extend(two_unit(Opcode::BinaryAdd, 0));
        bytes.extend(two_unit(Opcode::LoadConst, 2));
        bytes.extend(two_unit(Opcode::BinaryAdd, 0));
        bytes.extend(two_unit(Opcode::ReturnValue, 0));
        let consts = vec![ConstValue::Int(1), ConstValue::Int(2), ConstValue::Int(3)];
        let code = CodeObject::new(bytes, consts, vec![], 0, CodeFlags::default());
        let analysis = Analyzer::new(&code, NoopTracer).interpret(&CompileBudget::default()).unwrap();
        let mut tracer = NoopTracer;
        let graph = InstructionGraph::build(&analysis, &mut tracer, false);
        assert!(!graph.escapes(4));
        assert!(graph.escapes(8));
    }

    #[test]
    fn consumer_that_requires_boxed_forces_escape() {
        // a = 1 + 2; return a  (STORE_FAST/LOAD_FAST never unbox)
        let mut bytes = Vec::new();
        bytes.extend(two_unit(Opcode::LoadConst, 0));
        bytes.extend(two_unit(Opcode::LoadConst, 1));
        bytes.extend(two_unit(Opcode::BinaryAdd, 0));
        bytes.extend(two_unit(Opcode::StoreFast, 0));
        bytes.extend(two_unit(Opcode::LoadFast, 0));
        bytes.extend(two_unit(Opcode::ReturnValue, 0));
        let code = CodeObject::new(bytes, vec![ConstValue::Int(1), ConstValue::Int(2)], vec!["a".into()], 0, CodeFlags::default());
        let analysis = Analyzer::new(&code, NoopTracer).interpret(&CompileBudget::default()).unwrap();
        let mut tracer = NoopTracer;
        let graph = InstructionGraph::build(&analysis, &mut tracer, false);
        assert!(graph.escapes(4));
    }
}
