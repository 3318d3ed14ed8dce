// src/exec/quality.rs

//! Data-quality gate.

use tokio::time::Instant;
use tracing::{info, warn};

use crate::dag::{FailedCheck, Observation, QualityCheck, TaskParams};
use crate::errors::{TaskError, TaskErrorKind};
use crate::types::BoxFuture;
use crate::warehouse::WarehouseClient;

use super::{TaskContext, TaskExecutor};

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityCheckExecutor;

impl TaskExecutor for QualityCheckExecutor {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            let TaskParams::Quality(checks) = &ctx.task.params else {
                return Err(TaskError::new(
                    TaskErrorKind::DataQuality,
                    format!("task '{}' has no quality checks", ctx.task.name),
                ));
            };
            if checks.is_empty() {
                warn!(task = %ctx.task.name, "quality task has no checks; passing");
                return Ok(());
            }

            let conn = match ctx.connection().await {
                Ok(conn) => conn,
                Err(e) if e.kind == TaskErrorKind::Timeout => return Err(e),
                Err(e) => {
                    warn!(task = %ctx.task.name, error = %e, "no connection for quality checks");
                    return Err(TaskError::data_quality(unevaluated(checks, &e.detail)));
                }
            };
            let failed = evaluate_checks(&*conn, checks, ctx.deadline()).await?;

            if failed.is_empty() {
                info!(task = %ctx.task.name, checks = checks.len(), "all quality checks passed");
                Ok(())
            } else {
                for f in &failed {
                    warn!(task = %ctx.task.name, check = %f, "quality check failed");
                }
                Err(TaskError::data_quality(failed))
            }
        })
    }
}

/// Run every check in order and return the ones that did not hold.
///
/// Never stops at the first failure. A query error or an empty result counts
/// as a failed check and is recorded as the observation. Once `deadline` has
/// passed no further query is issued and the attempt times out.
pub async fn evaluate_checks(
    client: &dyn WarehouseClient,
    checks: &[QualityCheck],
    deadline: Option<Instant>,
) -> Result<Vec<FailedCheck>, TaskError> {
    let mut failed = Vec::new();

    for (i, check) in checks.iter().enumerate() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TaskError::new(
                TaskErrorKind::Timeout,
                format!("time budget used up after {i} of {} checks", checks.len()),
            ));
        }
        let observed = match client.query_scalar(&check.sql).await {
            Ok(Some(value)) if check.holds(&value) => continue,
            Ok(Some(value)) => Observation::Value(value),
            Ok(None) => Observation::NoRows,
            Err(e) => Observation::Error(e.to_string()),
        };
        failed.push(FailedCheck {
            check: check.clone(),
            observed,
        });
    }

    Ok(failed)
}

/// Every check marked as failed with `reason`, for when none could be run.
fn unevaluated(checks: &[QualityCheck], reason: &str) -> Vec<FailedCheck> {
    checks
        .iter()
        .map(|check| FailedCheck {
            check: check.clone(),
            observed: Observation::Error(reason.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskSpec;
    use crate::errors::WarehouseError;
    use crate::exec::RunContext;
    use crate::warehouse::{ScalarValue, WarehousePool};

    /// Answers by the table name at the end of the query.
    struct Counts;

    impl WarehouseClient for Counts {
        fn execute<'a>(&'a self, _: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>> {
            Box::pin(async { Ok(()) })
        }

        fn query_scalar<'a>(
            &'a self,
            statement: &'a str,
        ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>> {
            Box::pin(async move {
                match statement.rsplit(' ').next() {
                    Some("users") => Ok(Some(ScalarValue::Int(0))),
                    Some("songs") => Ok(Some(ScalarValue::Int(42))),
                    Some("artists") => Ok(None),
                    _ => Err(WarehouseError::Statement("relation does not exist".into())),
                }
            })
        }
    }

    #[tokio::test]
    async fn collects_every_failure() {
        let checks = vec![
            QualityCheck::equals("SELECT COUNT(*) FROM users", 0),
            QualityCheck::equals("SELECT COUNT(*) FROM songs", 0),
            QualityCheck::not_equals("SELECT COUNT(*) FROM artists", 0),
            QualityCheck::equals("SELECT COUNT(*) FROM time", 0),
        ];

        let failed = evaluate_checks(&Counts, &checks, None).await.unwrap();

        assert_eq!(failed.len(), 3);
        assert_eq!(failed[0].check, checks[1]);
        assert_eq!(failed[0].observed, Observation::Value(ScalarValue::Int(42)));
        assert_eq!(failed[1].observed, Observation::NoRows);
        assert!(matches!(failed[2].observed, Observation::Error(_)));
    }

    #[tokio::test]
    async fn expired_budget_stops_before_next_query() {
        let checks = vec![QualityCheck::equals("SELECT COUNT(*) FROM users", 0)];
        let err = evaluate_checks(&Counts, &checks, Some(Instant::now()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TaskErrorKind::Timeout);
    }

    #[tokio::test]
    async fn missing_connection_fails_every_check_with_the_reason() {
        let task = TaskSpec::quality(
            "quality",
            vec![
                QualityCheck::equals("SELECT COUNT(*) FROM users", 0),
                QualityCheck::equals("SELECT COUNT(*) FROM songs", 0),
            ],
        );
        let run = RunContext::new(chrono::Utc::now());
        let pool = WarehousePool::new(Vec::new());
        let ctx = TaskContext::new(&task, 1, &run, &pool);

        let err = QualityCheckExecutor.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind, TaskErrorKind::DataQuality);
        assert_eq!(err.failed_checks.len(), 2);
        for failed in &err.failed_checks {
            match &failed.observed {
                Observation::Error(reason) => assert!(reason.contains("no connections"), "{reason}"),
                other => panic!("unexpected observation {other:?}"),
            }
        }
    }
}
