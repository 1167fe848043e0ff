//! Abstract value lattice.
//!
//! [`Kind`] is the closed set of abstract value kinds the analyser reasons
//! about. Kinds are process-lifetime singletons (see [`AbstractValue`]);
//! mutability and provenance live on the [`crate::source::AbstractSource`]
//! attached at a use site, never on the kind itself.

use std::fmt;

use strum::{Display, EnumIter};

/// A compile-time approximation of the runtime type of a stack slot or local.
///
/// Closed set, per spec: no open polymorphism. Operation result tables are
/// expressed as plain `match`es over pairs of kinds rather than as a method
/// table of trait objects, since the set never grows at runtime.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Kind {
    Int,
    Float,
    Bool,
    Bytes,
    Str,
    List,
    Tuple,
    Set,
    Dict,
    Function,
    Slice,
    Type,
    None,
    Complex,
    Code,
    Module,
    ByteArray,
    MemoryView,
    Iterable,
    /// No statically known kind: the universal top element of the lattice.
    Any,
    /// Identity element under merge; a local that has not been observed yet.
    Undefined,
}

/// An interned, process-lifetime handle onto a [`Kind`].
///
/// The lattice has no per-value state beyond the kind tag, so interning
/// just means every `AbstractValue` for a given `Kind` compares and hashes
/// identically; there is nothing heap-allocated to share. The type exists
/// to keep call sites honest about "this is a lattice value, not a runtime
/// value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbstractValue(Kind);

impl AbstractValue {
    #[must_use]
    pub const fn new(kind: Kind) -> Self {
        Self(kind)
    }

    #[must_use]
    pub const fn kind(self) -> Kind {
        self.0
    }

    #[must_use]
    pub const fn undefined() -> Self {
        Self(Kind::Undefined)
    }

    #[must_use]
    pub const fn any() -> Self {
        Self(Kind::Any)
    }

    /// Whether a value of this kind is known, in all cases, to hash
    /// consistently (immutable, structurally comparable).
    #[must_use]
    pub const fn is_hashable(self) -> bool {
        matches!(
            self.0,
            Kind::Int
                | Kind::Float
                | Kind::Bool
                | Kind::Bytes
                | Kind::Str
                | Kind::Tuple
                | Kind::Function
                | Kind::Type
                | Kind::None
                | Kind::Complex
                | Kind::Code
                | Kind::Module
        )
    }

    /// Whether a value of this kind is known to be mutable in place.
    ///
    /// Mutability is a property of the *kind*, used only to decide whether
    /// an operation may alias; the mutation history of a specific value
    /// lives on its source, not here.
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        matches!(self.0, Kind::List | Kind::Dict | Kind::Set | Kind::ByteArray | Kind::MemoryView)
    }

    /// Whether every value of this kind is truthy regardless of contents.
    #[must_use]
    pub const fn is_always_truthy(self) -> bool {
        matches!(self.0, Kind::Function | Kind::Type | Kind::Module | Kind::Code)
    }

    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self.0, Kind::Int | Kind::Float | Kind::Bool | Kind::Complex)
    }

    /// Result kind of `self <binop> other`.
    ///
    /// Commutative where Python is commutative; falls back to [`Kind::Any`]
    /// whenever either side is `Any` or the operator has user-overridable
    /// semantics for at least one operand kind (so the analyser must not
    /// assume a fixed result type).
    #[must_use]
    pub fn binary_result(self, op: BinaryOp, other: Self) -> Self {
        use Kind::{Any, Bool, Bytes, Dict, Float, Int, List, Set, Str, Tuple, Undefined};
        let (a, b) = (self.0, other.0);
        if a == Undefined || b == Undefined {
            return Self::undefined();
        }
        let result = match (op, a, b) {
            (_, Any, _) | (_, _, Any) => Any,
            (BinaryOp::Add, Int | Bool, Int | Bool) => Int,
            (BinaryOp::Add, Float, Int | Bool | Float) | (BinaryOp::Add, Int | Bool, Float) => Float,
            (BinaryOp::Add, Str, Str) => Str,
            (BinaryOp::Add, Bytes, Bytes) => Bytes,
            (BinaryOp::Add, List, List) => List,
            (BinaryOp::Add, Tuple, Tuple) => Tuple,
            (BinaryOp::Add, Dict, Dict) => Dict,
            (BinaryOp::TrueDiv, Int | Bool | Float, Int | Bool | Float) => Float,
            (BinaryOp::FloorDiv | BinaryOp::Mod, Int | Bool, Int | Bool) => Int,
            (BinaryOp::FloorDiv | BinaryOp::Mod, Float, Int | Bool | Float)
            | (BinaryOp::FloorDiv | BinaryOp::Mod, Int | Bool, Float) => Float,
            (BinaryOp::Sub | BinaryOp::Mul, Int | Bool, Int | Bool) => Int,
            (BinaryOp::Sub | BinaryOp::Mul, Float, Int | Bool | Float)
            | (BinaryOp::Sub | BinaryOp::Mul, Int | Bool, Float) => Float,
            (BinaryOp::Mul, Str, Int | Bool) | (BinaryOp::Mul, Int | Bool, Str) => Str,
            (BinaryOp::Mul, List, Int | Bool) | (BinaryOp::Mul, Int | Bool, List) => List,
            (BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor, Int | Bool, Int | Bool) => Int,
            (BinaryOp::BitAnd | BinaryOp::BitOr, Set, Set) => Set,
            (BinaryOp::LShift | BinaryOp::RShift, Int | Bool, Int | Bool) => Int,
            (BinaryOp::Pow, Int | Bool, Int | Bool) => Int,
            (BinaryOp::Pow, Float, Int | Bool | Float) | (BinaryOp::Pow, Int | Bool, Float) => Float,
            _ => Any,
        };
        Self::new(result)
    }

    /// Result kind of the unary operation applied to `self`.
    #[must_use]
    pub fn unary_result(self, op: UnaryOp) -> Self {
        use Kind::{Bool, Float, Int, Undefined};
        if self.0 == Undefined {
            return Self::undefined();
        }
        let result = match (op, self.0) {
            (UnaryOp::Not, _) => Bool,
            (UnaryOp::Neg | UnaryOp::Pos, Int | Bool) => Int,
            (UnaryOp::Neg | UnaryOp::Pos, Float) => Float,
            (UnaryOp::Invert, Int | Bool) => Int,
            _ => Kind::Any,
        };
        Self::new(result)
    }

    /// Result kind of `self <cmp> other`; comparisons always yield `bool`
    /// unless either side is opaque, in which case an overridden dunder
    /// could return anything.
    #[must_use]
    pub fn compare_result(self, other: Self) -> Self {
        if self.0 == Kind::Any || other.0 == Kind::Any {
            Self::any()
        } else {
            Self::new(Kind::Bool)
        }
    }

    /// Result kind of `item in self`.
    #[must_use]
    pub fn contains_result(self) -> Self {
        if self.0 == Kind::Any {
            Self::any()
        } else {
            Self::new(Kind::Bool)
        }
    }

    /// Result kind of `self[index]`.
    #[must_use]
    pub fn subscript_result(self, index: Self) -> Self {
        use Kind::{Bytes, List, Slice, Str, Tuple};
        let result = match (self.0, index.0) {
            (List, Slice) => List,
            (Tuple, Slice) => Tuple,
            (Str, _) => Str,
            (Bytes, Slice) => Bytes,
            (Bytes, _) => Kind::Int,
            _ => Kind::Any,
        };
        Self::new(result)
    }

    /// Result kind of iterating `self` one step (`GetIter`/`IterNext`).
    #[must_use]
    pub fn iter_result(self) -> Self {
        Self::any()
    }

    /// Result kind of calling a value of this kind.
    #[must_use]
    pub fn call_result(self) -> Self {
        Self::any()
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Merge rule for the analyser's join: `merge(a, b) = a` if `a == b`,
/// otherwise the kind-wise join, falling back to `Any` whenever the pair
/// has no representable join. `Undefined` is the identity element.
#[must_use]
pub fn merge(a: AbstractValue, b: AbstractValue) -> AbstractValue {
    if a == b {
        return a;
    }
    match (a.kind(), b.kind()) {
        (Kind::Undefined, _) => b,
        (_, Kind::Undefined) => a,
        (Kind::Bool, Kind::Int) | (Kind::Int, Kind::Bool) => AbstractValue::new(Kind::Int),
        _ => AbstractValue::any(),
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let int = AbstractValue::new(Kind::Int);
        let float = AbstractValue::new(Kind::Float);
        assert_eq!(merge(int, int), int);
        assert_eq!(merge(int, float), merge(float, int));
    }

    #[test]
    fn undefined_is_merge_identity() {
        let int = AbstractValue::new(Kind::Int);
        assert_eq!(merge(AbstractValue::undefined(), int), int);
        assert_eq!(merge(int, AbstractValue::undefined()), int);
    }

    #[test]
    fn int_plus_float_is_float() {
        let int = AbstractValue::new(Kind::Int);
        let float = AbstractValue::new(Kind::Float);
        assert_eq!(int.binary_result(BinaryOp::Add, float).kind(), Kind::Float);
        assert_eq!(float.binary_result(BinaryOp::Add, int).kind(), Kind::Float);
    }

    #[test]
    fn any_is_absorbing() {
        let any = AbstractValue::any();
        let int = AbstractValue::new(Kind::Int);
        assert_eq!(int.binary_result(BinaryOp::Add, any).kind(), Kind::Any);
        assert_eq!(any.binary_result(BinaryOp::Add, int).kind(), Kind::Any);
    }

    #[test]
    fn true_div_is_always_float() {
        let int = AbstractValue::new(Kind::Int);
        assert_eq!(int.binary_result(BinaryOp::TrueDiv, int).kind(), Kind::Float);
    }
}
