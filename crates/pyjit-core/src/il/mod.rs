//! IL emission layer: the façade the bytecode-to-IL driver drives, the
//! runtime-helper token registry, and the packaged compile result.

pub mod emitter;
pub mod method;
pub mod token;

pub use emitter::{BranchKind, Emitter, EmitError, Label, LocalId, MachineOp, MachineType};
pub use method::{CallSite, JitMethod};
pub use token::{registry, HelperToken, WellKnownHelper};
