//! Top-level entry point (spec §6): analyser -> instruction graph -> driver
//! -> emitter, in one call.

use crate::{
    budget::CompileBudget,
    bytecode::{analyzer::Analyzer, code::CodeObject, driver::Driver, graph::InstructionGraph},
    error::CompileError,
    il::{emitter::Emitter, method::JitMethod},
    tracer::CompileTracer,
};

/// Compiles one function's bytecode to native code through `emitter`.
///
/// `tracer` is cloned once per phase (analysis, instruction-graph
/// construction, emission) rather than threaded as a single shared
/// instance — each phase owns its tracer outright, which keeps
/// `Analyzer`/`Driver` simple value types instead of needing a borrowed
/// tracer with its own lifetime. [`NoopTracer`](crate::tracer::NoopTracer)
/// clones for free; a recording tracer used across phases should be
/// inspected per phase rather than as one merged timeline.
///
/// # Errors
/// `CompileError::Malformed`/`BudgetExceeded` abort the compile the same
/// way a malformed-bytecode or resource-limit failure always does; the
/// host is expected to fall back to interpretation. `CompileError::
/// EmitFailed` surfaces a backend-side failure to lower the emitted IL.
pub fn compile<E: Emitter, Tr: CompileTracer + Clone>(
    code: &CodeObject,
    emitter: E,
    budget: &CompileBudget,
    tracer: Tr,
) -> Result<JitMethod, CompileError> {
    let analysis = Analyzer::new(code, tracer.clone()).interpret(budget)?;
    let mut graph_tracer = tracer.clone();
    let graph = InstructionGraph::build(&analysis, &mut graph_tracer, false);
    let driver = Driver::new(code, &analysis, &graph, emitter, tracer);
    let emitter = driver.drive(budget)?;
    Ok(emitter.compile()?)
}
