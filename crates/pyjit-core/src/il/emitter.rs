//! IL emitter façade (spec §4.4).
//!
//! A pure interface the bytecode-to-IL driver drives; it knows nothing
//! about Python bytecode and nothing about any particular native backend.
//! Concrete implementations live outside this crate (the host's actual
//! code generator) or, for tests, in `testutil` — the host backend is an
//! external collaborator per spec §1.
//!
//! Mirrors the teacher's `CodeBuilder` (jump-label-with-patching, typed
//! emit methods per operand shape) generalized from "emit Python bytecode
//! bytes" to "emit machine-level IL instructions".

use crate::il::{method::JitMethod, token::HelperToken};

/// Opaque label handle. Defined with [`Emitter::define_label`], bound to
/// an emission point with [`Emitter::mark_label`], and may be branched to
/// before it is bound (forward jumps), mirroring the teacher's
/// `JumpLabel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Opaque local handle, typed at definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Machine-level type of an IL local or stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineType {
    I32,
    I64,
    F64,
    /// A refcount-bearing pointer to a boxed runtime object.
    ObjectPointer,
    /// A stack-allocated value-class local (used for sequence-unpacking
    /// temporaries, per the façade contract in spec §4.4).
    ValueClass { size_bytes: u32 },
}

/// Integer comparison / branch kinds the façade exposes. `Always` is an
/// unconditional jump; `True`/`False` branch on a boolean machine value;
/// the rest compare the top two machine-typed stack values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    Always,
    True,
    False,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LessEqualUnsigned,
}

/// Arithmetic/bitwise operation on the machine-typed top of stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineOp {
    LShift,
    RShift,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Xor,
    Not,
}

/// A reason the façade can fail to produce a [`JitMethod`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The backend ran out of its own resources (registers, code buffer).
    BackendCapacity,
    /// A label was branched to but never marked.
    UnboundLabel(Label),
}

/// Pure interface for driving a native code generator.
///
/// The driver calls these in emission order; nothing here executes code,
/// it only describes it. `compile` is the only method that produces a
/// result — everything before it is infallible from the façade's point of
/// view (a backend that cannot represent an operation should surface that
/// as a panic during development, not a runtime `Result`, since the
/// operation set is fixed and known at driver-implementation time).
pub trait Emitter {
    fn define_label(&mut self) -> Label;
    fn mark_label(&mut self, label: Label);

    fn define_local(&mut self, ty: MachineType) -> LocalId;

    fn ld_i4(&mut self, value: i32);
    fn ld_u4(&mut self, value: u32);
    fn ld_i8(&mut self, value: i64);
    fn ld_r8(&mut self, value: f64);
    fn ld_loc(&mut self, local: LocalId);
    fn st_loc(&mut self, local: LocalId);

    fn branch(&mut self, kind: BranchKind, target: Label);

    /// Emits a call to a runtime helper registered for `token`. The
    /// façade does not validate arity here; the driver is responsible for
    /// having pushed the right number of machine values first.
    fn emit_call(&mut self, token: HelperToken);

    fn machine_op(&mut self, op: MachineOp);

    /// Emits a return of the function's declared return type.
    fn ret(&mut self);

    /// Finalizes emission and lowers to native code.
    ///
    /// # Errors
    /// If the backend cannot represent what was emitted (capacity, an
    /// unbound label) it returns [`EmitError`] instead of a [`JitMethod`];
    /// the driver's caller (`compile()`) treats that exactly like a
    /// malformed-bytecode abort.
    fn compile(self) -> Result<JitMethod, EmitError>;
}
