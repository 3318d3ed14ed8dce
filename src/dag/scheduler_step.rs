// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::TaskName;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that drive the scheduler by hand and assert on what
/// changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Tasks promoted to `Ready` by this step, in dispatch order.
    pub newly_ready: Vec<TaskName>,
    /// Tasks that ended `Failed` in this step.
    pub newly_failed: Vec<TaskName>,
    /// Tasks that ended `Skipped` in this step.
    pub newly_skipped: Vec<TaskName>,
    /// Whether every task is now terminal.
    pub run_just_finished: bool,
}
