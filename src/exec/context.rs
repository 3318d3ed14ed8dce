// src/exec/context.rs

//! What an executor gets to see while running one attempt.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::dag::TaskSpec;
use crate::errors::{LoaddagError, Result, TaskError};
use crate::warehouse::{PooledConnection, WarehousePool};

/// Access-key/secret pair for the bulk-copy source.
///
/// Supplied by the embedding application; `Debug` never prints the values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Read the pair from the named environment variables.
    pub fn from_env(access_key_var: &str, secret_key_var: &str) -> Result<Self> {
        let read = |var: &str| {
            std::env::var(var).map_err(|_| {
                LoaddagError::ConfigError(format!(
                    "credential environment variable '{var}' is not set"
                ))
            })
        };
        Ok(Self::new(read(access_key_var)?, read(secret_key_var)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Values shared by every task of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Logical timestamp the run processes; drives source path templates.
    pub logical_date: DateTime<Utc>,
    pub credentials: Option<Credentials>,
}

impl RunContext {
    pub fn new(logical_date: DateTime<Utc>) -> Self {
        Self {
            logical_date,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Per-attempt view handed to a [`TaskExecutor`](crate::exec::TaskExecutor).
///
/// The attempt's time budget is enforced between statements only: a statement
/// that has been sent to the warehouse always runs to completion (or until the
/// warehouse's own statement timeout).
pub struct TaskContext<'a> {
    pub task: &'a TaskSpec,
    /// 1-based attempt number.
    pub attempt: u32,
    pub run: &'a RunContext,
    pub pool: &'a WarehousePool,
    pub started: Instant,
    /// Time budget of the attempt, if any.
    pub timeout: Option<Duration>,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        task: &'a TaskSpec,
        attempt: u32,
        run: &'a RunContext,
        pool: &'a WarehousePool,
    ) -> Self {
        Self {
            task,
            attempt,
            run,
            pool,
            started: Instant::now(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point in time after which no new statement may be issued.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|t| self.started + t)
    }

    /// Fail with a timeout once the budget is used up.
    ///
    /// Executors call this before every statement.
    pub fn ensure_time_left(&self) -> std::result::Result<(), TaskError> {
        match (self.timeout, self.deadline()) {
            (Some(limit), Some(deadline)) if Instant::now() >= deadline => {
                Err(TaskError::timeout(limit))
            }
            _ => Ok(()),
        }
    }

    /// Check out a dedicated connection for this attempt.
    ///
    /// Waiting for a free connection counts against the time budget. Pool
    /// failures are reported with the error category of the task kind.
    pub async fn connection(&self) -> std::result::Result<PooledConnection, TaskError> {
        let checkout = self.pool.checkout();
        let conn = match (self.timeout, self.deadline()) {
            (Some(limit), Some(deadline)) => tokio::time::timeout_at(deadline, checkout)
                .await
                .map_err(|_| TaskError::timeout(limit))?,
            _ => checkout.await,
        };
        conn.map_err(|e| TaskError::for_kind(self.task.kind(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskErrorKind;

    #[test]
    fn debug_never_prints_secrets() {
        let creds = Credentials::new("AKIAEXAMPLE", "very-secret");
        let printed = format!("{creds:?}");
        assert!(!printed.contains("AKIAEXAMPLE"));
        assert!(!printed.contains("very-secret"));
    }

    #[tokio::test]
    async fn budget_runs_out_after_timeout() {
        let task = TaskSpec::barrier("b");
        let run = RunContext::new(Utc::now());
        let pool = WarehousePool::new(Vec::new());
        let ctx = TaskContext::new(&task, 1, &run, &pool)
            .with_timeout(Some(Duration::from_millis(30)));

        assert!(ctx.ensure_time_left().is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = ctx.ensure_time_left().unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Timeout);
    }

    #[tokio::test]
    async fn no_timeout_means_no_deadline() {
        let task = TaskSpec::barrier("b");
        let run = RunContext::new(Utc::now());
        let pool = WarehousePool::new(Vec::new());
        let ctx = TaskContext::new(&task, 1, &run, &pool);

        assert_eq!(ctx.deadline(), None);
        assert!(ctx.ensure_time_left().is_ok());
    }
}
