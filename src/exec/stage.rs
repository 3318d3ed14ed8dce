// src/exec/stage.rs

//! Staging loads: `DELETE FROM <table>` followed by a bulk `COPY`.

use tracing::{debug, info};

use crate::dag::{StageFormat, StageParams, TaskParams};
use crate::errors::TaskError;
use crate::types::BoxFuture;

use super::template::render_source;
use super::{Credentials, TaskContext, TaskExecutor};

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Copy, Default)]
pub struct StageLoadExecutor;

impl TaskExecutor for StageLoadExecutor {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            let TaskParams::Stage(params) = &ctx.task.params else {
                return Err(TaskError::stage(format!(
                    "task '{}' has no staging parameters",
                    ctx.task.name
                )));
            };

            let location = render_source(&params.source, &ctx.run.logical_date)
                .map_err(|e| TaskError::stage(e.to_string()))?;
            let credentials = ctx.run.credentials.as_ref();

            let conn = ctx.connection().await?;

            ctx.ensure_time_left()?;
            info!(task = %ctx.task.name, table = %params.table, "clearing staging table");
            conn.execute(&format!("DELETE FROM {}", params.table))
                .await
                .map_err(|e| TaskError::stage(format!("clearing {}: {e}", params.table)))?;

            ctx.ensure_time_left()?;
            info!(
                task = %ctx.task.name,
                table = %params.table,
                source = %location,
                "copying source into staging table"
            );
            debug!(
                statement = %redacted_copy_statement(params, &location, credentials),
                "issuing COPY"
            );
            conn.execute(&copy_statement(params, &location, credentials))
                .await
                .map_err(|e| {
                    TaskError::stage(format!("copying {location} into {}: {e}", params.table))
                })?;

            Ok(())
        })
    }
}

/// The `COPY` statement for `params`, reading from the already rendered
/// `location`.
pub fn copy_statement(
    params: &StageParams,
    location: &str,
    credentials: Option<&Credentials>,
) -> String {
    render_copy(params, location, credentials, false)
}

/// Same as [`copy_statement`] with the secret key replaced, fit for logs.
pub fn redacted_copy_statement(
    params: &StageParams,
    location: &str,
    credentials: Option<&Credentials>,
) -> String {
    render_copy(params, location, credentials, true)
}

fn render_copy(
    params: &StageParams,
    location: &str,
    credentials: Option<&Credentials>,
    redact: bool,
) -> String {
    let mut sql = format!("COPY {}\nFROM {}", params.table, quote(location));

    if let Some(creds) = credentials {
        let secret = if redact { REDACTED } else { creds.secret_key.as_str() };
        sql.push_str(&format!(
            "\nACCESS_KEY_ID {}\nSECRET_ACCESS_KEY {}",
            quote(&creds.access_key),
            quote(secret)
        ));
    }

    match &params.format {
        StageFormat::Json { json_path, options } => {
            sql.push_str(&format!("\nFORMAT AS JSON {}", quote(json_path)));
            for opt in options {
                sql.push(' ');
                sql.push_str(opt);
            }
        }
        StageFormat::Csv {
            delimiter,
            ignore_header,
        } => {
            sql.push_str(&format!(
                "\nCSV DELIMITER {} IGNOREHEADER {ignore_header}",
                quote(&delimiter.to_string())
            ));
        }
    }

    sql
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> StageParams {
        StageParams {
            table: "staging_events".into(),
            source: "s3://udacity-dend/log_data".into(),
            format: StageFormat::Json {
                json_path: "s3://udacity-dend/log_json_path.json".into(),
                options: vec!["truncatecolumns".into()],
            },
        }
    }

    #[test]
    fn json_copy_with_credentials() {
        let creds = Credentials::new("AKIA", "s3cr3t");
        let sql = copy_statement(&events(), "s3://udacity-dend/log_data/2018/11", Some(&creds));
        assert_eq!(
            sql,
            "COPY staging_events\n\
             FROM 's3://udacity-dend/log_data/2018/11'\n\
             ACCESS_KEY_ID 'AKIA'\n\
             SECRET_ACCESS_KEY 's3cr3t'\n\
             FORMAT AS JSON 's3://udacity-dend/log_json_path.json' truncatecolumns"
        );
    }

    #[test]
    fn redacted_statement_hides_secret_only() {
        let creds = Credentials::new("AKIA", "s3cr3t");
        let sql = redacted_copy_statement(&events(), "s3://x", Some(&creds));
        assert!(sql.contains("'AKIA'"));
        assert!(!sql.contains("s3cr3t"));
        assert!(sql.contains(REDACTED));
    }

    #[test]
    fn csv_copy_without_credentials() {
        let params = StageParams {
            table: "staging_songs".into(),
            source: "s3://bucket/songs.csv".into(),
            format: StageFormat::Csv {
                delimiter: ',',
                ignore_header: 1,
            },
        };
        let sql = copy_statement(&params, "s3://bucket/it's.csv", None);
        assert_eq!(
            sql,
            "COPY staging_songs\nFROM 's3://bucket/it''s.csv'\nCSV DELIMITER ',' IGNOREHEADER 1"
        );
    }
}
