// src/exec/sql.rs

//! Plain SQL tasks, used to bootstrap the schema before anything is staged.

use tracing::info;

use crate::dag::TaskParams;
use crate::errors::TaskError;
use crate::types::BoxFuture;

use super::{TaskContext, TaskExecutor};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlExecutor;

impl TaskExecutor for SqlExecutor {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            let TaskParams::Sql(statements) = &ctx.task.params else {
                return Err(TaskError::load(format!(
                    "task '{}' has no SQL statements",
                    ctx.task.name
                )));
            };

            let conn = ctx.connection().await?;

            info!(task = %ctx.task.name, statements = statements.len(), "running SQL statements");
            for (i, statement) in statements.iter().enumerate() {
                ctx.ensure_time_left()?;
                conn.execute(statement).await.map_err(|e| {
                    TaskError::load(format!(
                        "statement {} of {}: {e}",
                        i + 1,
                        statements.len()
                    ))
                })?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::*;
    use crate::dag::TaskSpec;
    use crate::errors::{TaskErrorKind, WarehouseError};
    use crate::exec::RunContext;
    use crate::warehouse::{ScalarValue, WarehouseClient, WarehousePool};

    /// Records statements; rejects any that mention `broken`.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl WarehouseClient for Recorder {
        fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(statement.to_string());
                if statement.contains("broken") {
                    Err(WarehouseError::Statement("syntax error".into()))
                } else {
                    Ok(())
                }
            })
        }

        fn query_scalar<'a>(
            &'a self,
            _: &'a str,
        ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>> {
            Box::pin(async { Ok(None) })
        }
    }

    async fn run(task: TaskSpec, recorder: &Recorder) -> Result<(), TaskError> {
        let run = RunContext::new(Utc::now());
        let pool = WarehousePool::single(recorder.clone());
        let ctx = TaskContext::new(&task, 1, &run, &pool);
        SqlExecutor.execute(&ctx).await
    }

    #[tokio::test]
    async fn runs_statements_in_order() {
        let recorder = Recorder::default();
        let task = TaskSpec::sql(
            "create_tables",
            ["CREATE TABLE IF NOT EXISTS users (id INT)", "CREATE TABLE IF NOT EXISTS songs (id INT)"],
        );

        run(task, &recorder).await.unwrap();

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                "CREATE TABLE IF NOT EXISTS users (id INT)".to_string(),
                "CREATE TABLE IF NOT EXISTS songs (id INT)".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_first_failing_statement() {
        let recorder = Recorder::default();
        let task = TaskSpec::sql("create_tables", ["CREATE broken", "CREATE TABLE t (id INT)"]);

        let err = run(task, &recorder).await.unwrap_err();

        assert_eq!(err.kind, TaskErrorKind::Load);
        assert!(err.detail.contains("statement 1 of 2"), "{}", err.detail);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
