// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`] is raised while building a [`Dag`](crate::dag::Dag) and
//!   aborts before any run starts.
//! - [`WarehouseError`] comes out of a [`WarehouseClient`](crate::warehouse::WarehouseClient).
//! - [`TaskError`] is what an executor hands back to the scheduler; it drives
//!   the retry loop and ends up verbatim in the run report.
//! - [`LoaddagError`] covers configuration and IO problems at the edge.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::dag::{FailedCheck, TaskKind};

#[derive(Error, Debug)]
pub enum LoaddagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid DAG: {0}")]
    Graph(#[from] GraphError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LoaddagError>;

/// Structural problems detected while building a DAG.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("DAG contains no tasks")]
    Empty,

    #[error("duplicate task name '{0}'")]
    DuplicateTask(String),

    #[error("edge '{upstream}' -> '{downstream}' references unknown task '{missing}'")]
    UnknownTask {
        upstream: String,
        downstream: String,
        missing: String,
    },

    #[error("task '{0}' cannot depend on itself")]
    SelfLoop(String),

    #[error("cycle detected in task DAG involving task '{0}'")]
    Cycle(String),

    #[error("designated start task '{0}' is not in the DAG")]
    UnknownStart(String),

    #[error("designated start task '{0}' has upstream dependencies")]
    StartHasUpstream(String),

    #[error("DAG must have exactly one start task, found {0:?}")]
    MultipleStartTasks(Vec<String>),

    #[error("tasks unreachable from start task '{start}': {unreachable:?}")]
    Unreachable {
        start: String,
        unreachable: Vec<String>,
    },
}

/// Failures reported by the warehouse boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WarehouseError {
    #[error("statement failed: {0}")]
    Statement(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not decode result: {0}")]
    Decode(String),
}

/// Category of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskErrorKind {
    /// Clearing or bulk-copying a staging table failed.
    Stage,
    /// A fact/dimension delete or insert, or a plain SQL statement, failed.
    Load,
    /// One or more quality predicates did not hold.
    DataQuality,
    /// The attempt exceeded the per-task timeout.
    Timeout,
    /// The run was cancelled before the task could finish.
    Cancelled,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorKind::Stage => "stage",
            TaskErrorKind::Load => "load",
            TaskErrorKind::DataQuality => "data quality",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// Error returned by a task executor.
///
/// `failed_checks` is only populated for [`TaskErrorKind::DataQuality`] and
/// always lists every failing predicate, not just the first.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {detail}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub detail: String,
    pub failed_checks: Vec<FailedCheck>,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            failed_checks: Vec::new(),
        }
    }

    /// Error of the category that matches a task kind.
    pub fn for_kind(kind: TaskKind, detail: impl Into<String>) -> Self {
        let error_kind = match kind {
            TaskKind::StageLoad => TaskErrorKind::Stage,
            TaskKind::QualityCheck => TaskErrorKind::DataQuality,
            TaskKind::FactLoad | TaskKind::DimensionLoad | TaskKind::Sql | TaskKind::Barrier => {
                TaskErrorKind::Load
            }
        };
        Self::new(error_kind, detail)
    }

    pub fn stage(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Stage, detail)
    }

    pub fn load(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Load, detail)
    }

    pub fn data_quality(failed_checks: Vec<FailedCheck>) -> Self {
        Self {
            kind: TaskErrorKind::DataQuality,
            detail: format!("{} quality check(s) failed", failed_checks.len()),
            failed_checks,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(TaskErrorKind::Timeout, format!("attempt exceeded {after:?}"))
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Cancelled, detail)
    }

    /// Whether the scheduler may retry after this error.
    pub fn is_retryable(&self) -> bool {
        self.kind != TaskErrorKind::Cancelled
    }
}
