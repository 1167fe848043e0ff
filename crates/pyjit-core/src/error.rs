//! Compile-time error taxonomy.
//!
//! Per spec §7 there are three failure taxonomies; only two surface as a
//! Rust `Error` (the third, runtime helper failure, is communicated back
//! through the emitted calling convention and has no Rust-level type —
//! see `crate::il::token`). Follows the teacher's hand-written
//! `Display` + `std::error::Error` pattern rather than pulling in
//! `thiserror`/`anyhow`, since the teacher's dependency stack carries
//! neither.

use std::fmt;

/// Result alias for anything that can fail to compile.
pub type CompileResult<T> = Result<T, CompileError>;

/// Why a compile was abandoned.
///
/// Both variants cause the host to fall back to interpreting the function;
/// from the analyser's and driver's point of view there is no recoverable
/// path once either is returned — compilation is abandoned wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Malformed bytecode: unknown opcode, inconsistent stack depth at a
    /// merge, broken block nesting, or a branch to an unreached offset.
    Malformed { reason: MalformedReason, pc: Option<usize> },
    /// A compile budget (opcode count or IL size) was exceeded.
    BudgetExceeded { metric: BudgetMetric, limit: usize, actual: usize },
    /// The emitter façade's backend could not lower what the driver emitted
    /// (capacity, or a label branched to but never marked).
    EmitFailed(crate::il::emitter::EmitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    UnknownOpcode,
    StackDepthMismatch,
    BrokenBlockNesting,
    BranchToUnreachedOffset,
    MismatchedStackEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetMetric {
    OpcodeCount,
    IlInstructionCount,
    WorkQueueIterations,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::UnknownOpcode => "unknown opcode",
            Self::StackDepthMismatch => "stack depth mismatch at a merge",
            Self::BrokenBlockNesting => "mismatched block nesting",
            Self::BranchToUnreachedOffset => "branch to an unreached offset",
            Self::MismatchedStackEffect => "opcode stack effect does not match observed edges",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for BudgetMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OpcodeCount => "opcode count",
            Self::IlInstructionCount => "IL instruction count",
            Self::WorkQueueIterations => "analyser work-queue iterations",
        };
        f.write_str(msg)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason, pc: Some(pc) } => write!(f, "malformed bytecode at pc {pc}: {reason}"),
            Self::Malformed { reason, pc: None } => write!(f, "malformed bytecode: {reason}"),
            Self::BudgetExceeded { metric, limit, actual } => {
                write!(f, "compile budget exceeded ({metric}): {actual} > {limit}")
            }
            Self::EmitFailed(crate::il::emitter::EmitError::BackendCapacity) => {
                write!(f, "emitter backend ran out of capacity")
            }
            Self::EmitFailed(crate::il::emitter::EmitError::UnboundLabel(label)) => {
                write!(f, "label {} was branched to but never marked", label.0)
            }
        }
    }
}

impl std::error::Error for CompileError {}

impl From<crate::state::StackDepthMismatch> for CompileError {
    fn from(_: crate::state::StackDepthMismatch) -> Self {
        Self::Malformed { reason: MalformedReason::StackDepthMismatch, pc: None }
    }
}

impl From<crate::il::emitter::EmitError> for CompileError {
    fn from(err: crate::il::emitter::EmitError) -> Self {
        Self::EmitFailed(err)
    }
}
