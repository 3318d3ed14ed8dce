// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`task`] describes tasks: kind, parameters, quality predicates.
//! - [`graph`] holds the validated, immutable task graph.
//! - [`builder`] assembles a graph from tasks and explicit edges.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   tasks are ready, records outcomes and propagates failures.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod task;

pub use builder::DagBuilder;
pub use graph::Dag;
pub use scheduler::{Scheduler, SkipReason, TaskState};
pub use scheduler_step::SchedulerStep;
pub use task::{
    FailedCheck, LoadParams, Observation, QualityCheck, StageFormat, StageParams, TaskKind,
    TaskName, TaskParams, TaskSpec,
};
