#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "bytecode offsets and oparg widths are checked at decode time")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts mirror CPython's own oparg handling")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors CPython's machine-int arithmetic")]
#![expect(clippy::too_many_arguments, reason = "some helper prototypes mirror the runtime calling convention")]
#![expect(clippy::module_name_repetitions, reason = "re-exported names stay recognizable at call sites")]

pub mod block;
pub mod budget;
pub mod bytecode;
pub mod compile;
pub mod error;
pub mod il;
pub mod locals;
pub mod source;
pub mod state;
pub mod tracer;
pub mod value;

pub use crate::{
    block::{BlockFlags, BlockInfo, BlockKind, BlockStack, ExceptionHandler, HandlerArena, HandlerId, RaiseAndFreeTails},
    budget::{BudgetTracker, CompileBudget},
    bytecode::{AnalysisResult, Analyzer, CodeFlags, CodeObject, ConstValue, Driver, EdgeKind, Instruction, InstructionGraph, Opcode},
    compile::compile,
    error::{BudgetMetric, CompileError, CompileResult, MalformedReason},
    il::{registry, BranchKind, CallSite, EmitError, Emitter, HelperToken, JitMethod, Label, LocalId, MachineOp, MachineType, WellKnownHelper},
    locals::{AbstractLocalInfo, CowVec},
    source::{Origin, Source, SourceArena, SourceId, ValueWithSource},
    state::{InterpreterState, StackDepthMismatch},
    tracer::{CompileTracer, NoopTracer, RecordingTracer, TraceEvent},
    value::{AbstractValue, Kind},
};
