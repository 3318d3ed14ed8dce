use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

/// Boxed future used at the trait seams (warehouse client, task executors).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-run state of a task.
///
/// Transitions: `Pending -> Ready -> Running -> {Succeeded, Failed}` and
/// `Pending|Ready -> Skipped` (upstream failure or cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Overall result of one DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// At least one task failed. Takes precedence over `Cancelled`.
    Failed,
    /// The run was cancelled and no task failed.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
            RunOutcome::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

/// How a fact/dimension load treats existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Delete everything, then insert (default).
    #[default]
    Truncate,
    /// Insert on top of existing rows.
    Append,
}

/// Which template set a table load draws its `SELECT` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSet {
    Fact,
    Dimension,
}

impl fmt::Display for TemplateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateSet::Fact => f.write_str("fact"),
            TemplateSet::Dimension => f.write_str("dimension"),
        }
    }
}

/// Comparison applied between a quality check's expected and observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    Equal,
    NotEqual,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Equal => f.write_str("=="),
            Comparison::NotEqual => f.write_str("!="),
        }
    }
}
