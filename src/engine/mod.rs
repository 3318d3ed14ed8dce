// src/engine/mod.rs

//! Run engine for loaddag.
//!
//! The scheduling semantics live in the pure [`Scheduler`](crate::dag::Scheduler);
//! this module is the async shell around it:
//! - [`runtime`] owns the scheduler, dispatches ready tasks onto workers up
//!   to the concurrency limit and reacts to their [`RunEvent`]s.
//! - [`retry`] computes how often and how long workers back off.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::TaskError;

pub use crate::dag::TaskName;

/// Default upper bound on concurrently running tasks.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Settings of one DAG run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Upper bound on tasks in `Running` at any instant. Never below 1.
    pub max_concurrency: usize,
    /// Run-wide retry policy; tasks may override it.
    pub retry: RetryPolicy,
    /// Logical timestamp the run processes.
    pub logical_date: DateTime<Utc>,
    /// Per-attempt budget, checked before each statement; running out is a
    /// retryable `Timeout` error. Statements already sent are never cut off.
    pub task_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(logical_date: DateTime<Utc>) -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            logical_date,
            task_timeout: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Events flowing from workers back into the runtime.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// An attempt failed and the worker is backing off before the next one.
    AttemptFailed {
        task: TaskName,
        attempt: u32,
        error: TaskError,
        retry_in: Duration,
    },
    /// The task reached its final result.
    TaskFinished {
        task: TaskName,
        attempts: u32,
        result: Result<(), TaskError>,
        elapsed: Duration,
    },
}

pub mod retry;
pub mod runtime;

pub use retry::RetryPolicy;
pub use runtime::{Runtime, run_dag};
