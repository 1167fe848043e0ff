//! Bytecode-facing layer: the opcode table, the code object this core
//! accepts as input, decoding, the abstract interpreter, the instruction
//! dependency graph, and the bytecode-to-IL driver.
//!
//! # Module structure
//!
//! - `op` - opcode enum, stack effects, unboxing whitelist
//! - `code` - the host's code object as seen by this core
//! - `instruction` - decodes raw bytes into `Instruction`s (EXTENDED_ARG collapsing)
//! - `analyzer` - the fixed-point abstract interpreter (spec §4.2)
//! - `graph` - escape analysis and box/unbox edge painting (spec §4.3)
//! - `driver` - walks the converged analysis and drives the IL emitter (spec §4.5)

pub mod analyzer;
pub mod code;
pub mod driver;
pub mod graph;
pub mod instruction;
pub mod op;

pub use analyzer::{AnalysisResult, Analyzer};
pub use code::{CodeFlags, CodeObject, ConstValue};
pub use driver::Driver;
pub use graph::{EdgeKind, InstructionGraph};
pub use instruction::Instruction;
pub use op::Opcode;
