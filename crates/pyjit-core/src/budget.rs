//! Compile budget: the cancellation mechanism from spec §5.
//!
//! Mirrors the teacher's `ResourceLimits`/`ResourceTracker` pairing — a
//! plain limits struct plus counters that the analyser and driver check as
//! they go — but scoped to what a single compile needs: how many opcodes
//! the analyser may visit, how many work-queue iterations the fixed point
//! may take, and how many IL instructions the driver may emit. Exceeding
//! any of them aborts the compile cleanly (`CompileError::BudgetExceeded`)
//! and the host falls back to interpretation, exactly like a malformed-
//! bytecode abort.

use crate::error::{BudgetMetric, CompileError};

/// Caller-supplied limits for one compile. There is no persisted or
/// process-wide state here — a fresh `CompileBudget` is constructed (or
/// cloned from a template) per compile job.
#[derive(Debug, Clone, Copy)]
pub struct CompileBudget {
    pub max_opcodes_visited: usize,
    pub max_work_queue_iterations: usize,
    pub max_il_instructions: usize,
}

impl Default for CompileBudget {
    fn default() -> Self {
        Self {
            max_opcodes_visited: 200_000,
            max_work_queue_iterations: 1_000_000,
            max_il_instructions: 500_000,
        }
    }
}

/// Running counters checked against a [`CompileBudget`] as a compile job
/// progresses. Lives only for the duration of one `compile()` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetTracker {
    opcodes_visited: usize,
    work_queue_iterations: usize,
    il_instructions: usize,
}

impl BudgetTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_opcode_visited(&mut self, budget: &CompileBudget) -> Result<(), CompileError> {
        self.opcodes_visited += 1;
        check(self.opcodes_visited, budget.max_opcodes_visited, BudgetMetric::OpcodeCount)
    }

    pub fn on_work_queue_iteration(&mut self, budget: &CompileBudget) -> Result<(), CompileError> {
        self.work_queue_iterations += 1;
        check(self.work_queue_iterations, budget.max_work_queue_iterations, BudgetMetric::WorkQueueIterations)
    }

    pub fn on_il_instruction_emitted(&mut self, budget: &CompileBudget) -> Result<(), CompileError> {
        self.il_instructions += 1;
        check(self.il_instructions, budget.max_il_instructions, BudgetMetric::IlInstructionCount)
    }
}

fn check(actual: usize, limit: usize, metric: BudgetMetric) -> Result<(), CompileError> {
    if actual > limit {
        Err(CompileError::BudgetExceeded { metric, limit, actual })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_trips_once_limit_exceeded() {
        let budget = CompileBudget { max_opcodes_visited: 2, ..CompileBudget::default() };
        let mut tracker = BudgetTracker::new();
        assert!(tracker.on_opcode_visited(&budget).is_ok());
        assert!(tracker.on_opcode_visited(&budget).is_ok());
        assert!(tracker.on_opcode_visited(&budget).is_err());
    }
}
