//! Runtime helper token registry.
//!
//! Runtime helpers (container builders, subscription, iteration, import,
//! true-division, etc.) are addressed by stable token IDs, each with a
//! fixed native prototype known to both the driver and the host. Per spec
//! §5 the registry is process-wide and read-only after a one-shot
//! initialization barrier — mirrors the teacher's pattern of initializing
//! interned tables once (`Interns`, `Builtins`) and treating them as
//! read-only thereafter.

use std::sync::OnceLock;

use ahash::AHashMap;

/// Stable identifier for a runtime helper, independent of registration
/// order — the driver embeds these in emitted call instructions, and the
/// host's backend resolves them to an address at link time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelperToken(pub u32);

/// A runtime helper's fixed native prototype: argument machine types and a
/// return machine type, expressed with the façade's own [`MachineType`]
/// rather than a separate type, since the prototype is exactly what the
/// driver needs to know to set up a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperPrototype {
    pub name: &'static str,
    pub params: Vec<crate::il::emitter::MachineType>,
    pub returns: Option<crate::il::emitter::MachineType>,
}

/// Well-known helpers the driver may reference by name instead of raw
/// token id, for readability at call sites; resolved to a [`HelperToken`]
/// through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum WellKnownHelper {
    TrueDivide,
    FloorDivide,
    Modulo,
    UnicodeConcat,
    BuildList,
    BuildTuple,
    BuildSet,
    BuildMap,
    DictUpdate,
    ListExtend,
    Subscript,
    BuildSlice,
    GetIter,
    IterNext,
    ImportFrom,
    RaisePyException,
    CompareOp,
    BinaryOp,
    UnaryOp,
    ContainsOp,
    /// Allocates a boxed int object from a raw machine `i64`, for a value
    /// crossing a `Box` edge in the instruction graph.
    BoxInt,
    /// Reads the raw `i64` out of a boxed int object, for a value crossing
    /// an `Unbox` edge. Only ever called on a value already known (via the
    /// analyser's `Kind`) to be an int.
    UnboxInt,
    /// Calls a Python callable with positional arguments already pushed.
    CallFunction,
    /// Resolves a name against the frame's globals then builtins.
    LoadGlobal,
    /// Builds the interpreter's singleton `AssertionError` instance.
    LoadAssertionError,
    /// Converts a boxed Python value to a machine boolean (`I32`) per
    /// Python truthiness (`__bool__`/`__len__`), for branching on a popped
    /// condition that the driver only ever holds boxed.
    Truthy,
    /// Fetches a pointer to constant-pool slot `oparg`, for a `LOAD_CONST`
    /// whose kind never supports unboxing (`Str`/`Bytes`/`None`/`Ellipsis`/
    /// `Code`/`Tuple`) — these are already boxed objects the host built when
    /// it constructed the code object, not values this core can materialize.
    ConstPoolGet,
}

/// Process-wide registry of helper tokens and their prototypes.
///
/// Initialized once under a `OnceLock` (a one-shot barrier); every access
/// after initialization is a read from an already-built, immutable map, so
/// there is no synchronization cost once warm.
pub struct TokenRegistry {
    by_helper: AHashMap<WellKnownHelper, HelperToken>,
    prototypes: AHashMap<HelperToken, HelperPrototype>,
}

impl TokenRegistry {
    #[must_use]
    pub fn token_for(&self, helper: WellKnownHelper) -> HelperToken {
        self.by_helper[&helper]
    }

    #[must_use]
    pub fn prototype(&self, token: HelperToken) -> Option<&HelperPrototype> {
        self.prototypes.get(&token)
    }

    fn build() -> Self {
        use crate::il::emitter::MachineType::{F64, I32, I64, ObjectPointer};
        use WellKnownHelper::{
            BinaryOp, BoxInt, BuildList, BuildMap, BuildSet, BuildSlice, BuildTuple, CallFunction, CompareOp,
            ConstPoolGet, ContainsOp, DictUpdate, FloorDivide, GetIter, ImportFrom, IterNext, ListExtend,
            LoadAssertionError, LoadGlobal, Modulo, RaisePyException, Subscript, TrueDivide, Truthy, UnaryOp,
            UnboxInt, UnicodeConcat,
        };

        let entries: Vec<(WellKnownHelper, &'static str, Vec<crate::il::emitter::MachineType>, Option<crate::il::emitter::MachineType>)> = vec![
            (TrueDivide, "pyjit_true_divide", vec![ObjectPointer, ObjectPointer], Some(F64)),
            (FloorDivide, "pyjit_floor_divide", vec![ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (Modulo, "pyjit_modulo", vec![ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (UnicodeConcat, "pyjit_unicode_concat", vec![ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (BuildList, "pyjit_build_list", vec![I32], Some(ObjectPointer)),
            (BuildTuple, "pyjit_build_tuple", vec![I32], Some(ObjectPointer)),
            (BuildSet, "pyjit_build_set", vec![I32], Some(ObjectPointer)),
            (BuildMap, "pyjit_build_map", vec![I32], Some(ObjectPointer)),
            (DictUpdate, "pyjit_dict_update", vec![ObjectPointer, ObjectPointer], None),
            (ListExtend, "pyjit_list_extend", vec![ObjectPointer, ObjectPointer], None),
            (Subscript, "pyjit_subscript", vec![ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (BuildSlice, "pyjit_build_slice", vec![ObjectPointer, ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (GetIter, "pyjit_get_iter", vec![ObjectPointer], Some(ObjectPointer)),
            (IterNext, "pyjit_iter_next", vec![ObjectPointer], Some(ObjectPointer)),
            (ImportFrom, "pyjit_import_from", vec![ObjectPointer, I32], Some(ObjectPointer)),
            (RaisePyException, "pyjit_raise", vec![ObjectPointer], None),
            (CompareOp, "pyjit_compare", vec![ObjectPointer, ObjectPointer, I32], Some(ObjectPointer)),
            (BinaryOp, "pyjit_binary_op", vec![ObjectPointer, ObjectPointer, I32], Some(ObjectPointer)),
            (UnaryOp, "pyjit_unary_op", vec![ObjectPointer, I32], Some(ObjectPointer)),
            (ContainsOp, "pyjit_contains", vec![ObjectPointer, ObjectPointer], Some(ObjectPointer)),
            (BoxInt, "pyjit_box_int", vec![I64], Some(ObjectPointer)),
            (UnboxInt, "pyjit_unbox_int", vec![ObjectPointer], Some(I64)),
            (CallFunction, "pyjit_call_function", vec![ObjectPointer, I32], Some(ObjectPointer)),
            (LoadGlobal, "pyjit_load_global", vec![I32], Some(ObjectPointer)),
            (LoadAssertionError, "pyjit_load_assertion_error", vec![], Some(ObjectPointer)),
            (Truthy, "pyjit_truthy", vec![ObjectPointer], Some(I32)),
            (ConstPoolGet, "pyjit_const_pool_get", vec![I32], Some(ObjectPointer)),
        ];

        let mut by_helper = AHashMap::default();
        let mut prototypes = AHashMap::default();
        for (index, (helper, name, params, returns)) in entries.into_iter().enumerate() {
            let token = HelperToken(u32::try_from(index).expect("token id overflow"));
            by_helper.insert(helper, token);
            prototypes.insert(token, HelperPrototype { name, params, returns });
        }
        Self { by_helper, prototypes }
    }
}

static REGISTRY: OnceLock<TokenRegistry> = OnceLock::new();

/// Returns the process-wide token registry, building it on first access.
#[must_use]
pub fn registry() -> &'static TokenRegistry {
    REGISTRY.get_or_init(TokenRegistry::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_well_known_helper_resolves_to_a_token() {
        use strum::IntoEnumIterator;
        let reg = registry();
        for helper in WellKnownHelper::iter() {
            let token = reg.token_for(helper);
            assert!(reg.prototype(token).is_some());
        }
    }

    #[test]
    fn registry_is_stable_across_calls() {
        let a = registry().token_for(WellKnownHelper::TrueDivide);
        let b = registry().token_for(WellKnownHelper::TrueDivide);
        assert_eq!(a, b);
    }
}
