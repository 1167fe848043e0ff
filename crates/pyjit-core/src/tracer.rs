//! Compile-time tracing infrastructure.
//!
//! Mirrors the teacher's `VmTracer` design: a trait-based tracer with a
//! zero-cost no-op default, so production compiles never pay for tracing.
//! [`NoopTracer`]'s methods are `#[inline(always)]` no-ops and compile away
//! entirely via monomorphization, identical to how the teacher's
//! `NoLimitTracker` eliminates resource-checking overhead in production.
//!
//! # Architecture
//!
//! [`CompileTracer`] defines hook points at the key events of analysis,
//! instruction-graph construction, and emission. [`Analyzer`](crate::bytecode::analyzer::Analyzer),
//! [`InstructionGraph`](crate::bytecode::graph::InstructionGraph), and
//! [`Driver`](crate::bytecode::driver::Driver) all take a `Tr: CompileTracer`
//! type parameter.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`RecordingTracer`] | Full event recording for tests and offline debugging |

use crate::bytecode::op::Opcode;

/// One traced event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The analyser computed (or re-widened) the state before `pc`.
    StateComputed { pc: usize, stack_depth: usize },
    /// The fixed-point work queue is re-enqueuing `pc` because its incoming
    /// state changed.
    Requeued { pc: usize },
    /// The instruction graph decided whether `pc` may run unboxed.
    EscapeDecided { pc: usize, opcode: Opcode, escape: bool },
    /// `deoptimizeInstructions` reverted a prior escape decision for `pc`.
    Deoptimized { pc: usize },
    /// The driver inserted a box/unbox conversion on the edge into `to`.
    BoxingConversion { to: usize, from: usize, unboxing: bool },
    /// The driver's compile-time block stack changed depth.
    BlockStackChanged { depth: usize },
}

/// Trait for compiler tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`]
/// requires zero lines of code and compiles to zero instructions.
/// Implementations only override the hooks they care about.
pub trait CompileTracer {
    #[inline(always)]
    fn on_state_computed(&mut self, _pc: usize, _stack_depth: usize) {}

    #[inline(always)]
    fn on_requeued(&mut self, _pc: usize) {}

    #[inline(always)]
    fn on_escape_decided(&mut self, _pc: usize, _opcode: Opcode, _escape: bool) {}

    #[inline(always)]
    fn on_deoptimized(&mut self, _pc: usize) {}

    #[inline(always)]
    fn on_boxing_conversion(&mut self, _to: usize, _from: usize, _unboxing: bool) {}

    #[inline(always)]
    fn on_block_stack_changed(&mut self, _depth: usize) {}
}

/// Zero-cost no-op tracer; the production default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompileTracer for NoopTracer {}

/// Records every event for inspection by tests and offline debugging.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

impl CompileTracer for RecordingTracer {
    fn on_state_computed(&mut self, pc: usize, stack_depth: usize) {
        self.events.push(TraceEvent::StateComputed { pc, stack_depth });
    }

    fn on_requeued(&mut self, pc: usize) {
        self.events.push(TraceEvent::Requeued { pc });
    }

    fn on_escape_decided(&mut self, pc: usize, opcode: Opcode, escape: bool) {
        self.events.push(TraceEvent::EscapeDecided { pc, opcode, escape });
    }

    fn on_deoptimized(&mut self, pc: usize) {
        self.events.push(TraceEvent::Deoptimized { pc });
    }

    fn on_boxing_conversion(&mut self, to: usize, from: usize, unboxing: bool) {
        self.events.push(TraceEvent::BoxingConversion { to, from, unboxing });
    }

    fn on_block_stack_changed(&mut self, depth: usize) {
        self.events.push(TraceEvent::BlockStackChanged { depth });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_events_in_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_state_computed(0, 0);
        tracer.on_requeued(0);
        assert_eq!(tracer.events().len(), 2);
        assert_eq!(tracer.events()[0], TraceEvent::StateComputed { pc: 0, stack_depth: 0 });
    }
}
