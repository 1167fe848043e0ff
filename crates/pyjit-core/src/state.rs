//! Per-opcode interpreter state: the analyser's abstract stack and locals
//! snapshot, and the merge used at control-flow join points.

use smallvec::SmallVec;

use crate::{
    locals::{merge_local_info, AbstractLocalInfo, CowVec},
    source::{SourceArena, SourceId, ValueWithSource},
};

/// Stack depth rarely exceeds a handful of entries per opcode; inline
/// storage avoids an allocation for the common case.
type Stack = SmallVec<[ValueWithSource; 8]>;

/// The abstract machine state the analyser associates with one reached
/// bytecode index: an ordered stack of source-tracked values and a CoW
/// snapshot of per-local info.
#[derive(Debug, Clone)]
pub struct InterpreterState {
    stack: Stack,
    locals: CowVec<AbstractLocalInfo>,
}

/// Merging two stacks of different depth is malformed bytecode, not a
/// recoverable analysis outcome — the verifier that produced the bytecode
/// guarantees stack depth is a static property of each program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackDepthMismatch {
    pub expected: usize,
    pub actual: usize,
}

impl InterpreterState {
    #[must_use]
    pub fn new(locals: CowVec<AbstractLocalInfo>) -> Self {
        Self { stack: Stack::new(), locals }
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, value: ValueWithSource) {
        self.stack.push(value);
    }

    /// # Panics
    /// If the stack is empty; callers must have validated the opcode's
    /// stack effect against the current depth first.
    pub fn pop(&mut self) -> ValueWithSource {
        self.stack.pop().expect("pop from empty abstract stack")
    }

    #[must_use]
    pub fn peek(&self, depth_from_top: usize) -> Option<&ValueWithSource> {
        let len = self.stack.len();
        (depth_from_top < len).then(|| &self.stack[len - 1 - depth_from_top])
    }

    #[must_use]
    pub fn stack(&self) -> &[ValueWithSource] {
        &self.stack
    }

    #[must_use]
    pub fn locals(&self) -> &CowVec<AbstractLocalInfo> {
        &self.locals
    }

    pub fn set_local(&mut self, index: u16, info: AbstractLocalInfo) {
        self.locals.set(index as usize, info);
    }

    #[must_use]
    pub fn local(&self, index: u16) -> &AbstractLocalInfo {
        self.locals.get(index as usize)
    }

    /// Joins `incoming` into `self` in place, returning `true` if `self`
    /// changed (the analyser uses this to decide whether to re-enqueue the
    /// successor). Both stacks must agree in depth; locals merge pointwise.
    pub fn merge_in(&mut self, incoming: &Self, sources: &mut SourceArena) -> Result<bool, StackDepthMismatch> {
        if self.stack.len() != incoming.stack.len() {
            return Err(StackDepthMismatch { expected: self.stack.len(), actual: incoming.stack.len() });
        }
        let mut changed = false;
        for i in 0..self.stack.len() {
            let a = self.stack[i];
            let b = incoming.stack[i];
            let merged_value = crate::value::merge(a.value, b.value);
            let merged_source = merge_sources(a.source, b.source, sources);
            if merged_value != a.value || merged_source != a.source {
                changed = true;
            }
            self.stack[i] = ValueWithSource { value: merged_value, source: merged_source };
        }

        debug_assert_eq!(self.locals.len(), incoming.locals.len(), "local count must match code's local count");
        for i in 0..self.locals.len() {
            let a = *self.locals.get(i);
            let b = *incoming.locals.get(i);
            let a_source = a.value.source;
            let b_source = b.value.source;
            let merged = merge_local_info(&a, &b, || merge_sources(a_source, b_source, sources));
            let a_kind = a.value.value.kind();
            if merged.value.value.kind() != a_kind || merged.definiteness != a.definiteness {
                changed = true;
            }
            self.locals.set(i, merged);
        }
        Ok(changed)
    }
}

fn merge_sources(a: Option<SourceId>, b: Option<SourceId>, arena: &mut SourceArena) -> Option<SourceId> {
    match (a, b) {
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(a), Some(b)) => Some(arena.alloc_merge(vec![a, b])),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        locals::Definiteness,
        source::Origin,
        value::{AbstractValue, Kind},
    };

    fn one_local_state(sources: &mut SourceArena, kind: Kind) -> InterpreterState {
        let src = sources.alloc(Origin::Local(0));
        let info = AbstractLocalInfo { value: ValueWithSource::new(AbstractValue::new(kind), src), definiteness: Definiteness::DefinitelyAssignedKnown };
        InterpreterState::new(CowVec::new(vec![info]))
    }

    #[test]
    fn merge_rejects_unequal_stack_depth() {
        let mut sources = SourceArena::new();
        let mut a = one_local_state(&mut sources, Kind::Int);
        let b = one_local_state(&mut sources, Kind::Int);
        a.push(ValueWithSource::synthesized(AbstractValue::new(Kind::Int)));
        assert!(a.merge_in(&b, &mut sources).is_err());
    }

    #[test]
    fn merge_same_kind_is_not_a_change() {
        let mut sources = SourceArena::new();
        let mut a = one_local_state(&mut sources, Kind::Int);
        let b = one_local_state(&mut sources, Kind::Int);
        // Same local source id across identical states -> no observable change.
        let changed = a.merge_in(&b, &mut sources).unwrap();
        assert!(!changed);
    }

    #[test]
    fn merge_different_kinds_widens_to_any() {
        let mut sources = SourceArena::new();
        let mut a = one_local_state(&mut sources, Kind::Int);
        let b = one_local_state(&mut sources, Kind::Str);
        let changed = a.merge_in(&b, &mut sources).unwrap();
        assert!(changed);
        assert_eq!(a.local(0).value.value.kind(), Kind::Any);
    }
}
