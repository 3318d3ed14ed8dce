// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    CheckConfig, ConfigFile, FormatConfig, RawConfigFile, RunSection, RunSettings, TaskConfig,
    TaskKindConfig, WarehouseSection, WarehouseSettings,
};
use crate::config::values::{parse_duration, parse_logical_date};
use crate::dag::{DagBuilder, LoadParams, QualityCheck, StageFormat, TaskParams, TaskSpec};
use crate::engine::RetryPolicy;
use crate::errors::{LoaddagError, Result};
use crate::exec::SqlTemplates;
use crate::types::TemplateSet;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = LoaddagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let run = validate_run_section(&raw.config)?;
        let warehouse = raw
            .warehouse
            .as_ref()
            .map(validate_warehouse_section)
            .transpose()?;

        let templates = SqlTemplates::new(raw.templates.fact, raw.templates.dimension);

        let mut builder = DagBuilder::new();
        for (name, task) in raw.task.iter() {
            builder.add_task(build_task(name, task, &templates, &run.retry)?);
            for upstream in task.after.iter() {
                builder.add_edge(upstream.as_str(), name.as_str());
            }
        }
        if let Some(start) = raw.config.start.as_deref() {
            builder = builder.start(start);
        }
        let dag = builder.build()?;

        Ok(ConfigFile::new_unchecked(run, warehouse, raw.credentials, dag))
    }
}

fn config_error(msg: impl Into<String>) -> LoaddagError {
    LoaddagError::ConfigError(msg.into())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(config_error(
            "config must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

fn duration_field(section: &str, field: &str, value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(|s| parse_duration(s).map_err(|e| config_error(format!("{section}.{field}: {e}"))))
        .transpose()
}

fn validate_run_section(cfg: &RunSection) -> Result<RunSettings> {
    if cfg.max_concurrency == 0 {
        return Err(config_error("[config].max_concurrency must be >= 1 (got 0)"));
    }
    if cfg.max_attempts == 0 {
        return Err(config_error("[config].max_attempts must be >= 1 (got 0)"));
    }
    if !cfg.backoff_multiplier.is_finite() || cfg.backoff_multiplier < 1.0 {
        return Err(config_error(format!(
            "[config].backoff_multiplier must be a finite number >= 1.0 (got {})",
            cfg.backoff_multiplier
        )));
    }

    let retry_delay = duration_field("[config]", "retry_delay", cfg.retry_delay.as_deref())?;
    let max_retry_delay =
        duration_field("[config]", "max_retry_delay", cfg.max_retry_delay.as_deref())?;
    let task_timeout = duration_field("[config]", "task_timeout", cfg.task_timeout.as_deref())?;
    if task_timeout == Some(Duration::ZERO) {
        return Err(config_error("[config].task_timeout must be greater than zero"));
    }

    let logical_date = cfg
        .logical_date
        .as_deref()
        .map(|s| parse_logical_date(s).map_err(|e| config_error(format!("[config].logical_date: {e}"))))
        .transpose()?;

    let mut retry = RetryPolicy::exponential(
        cfg.max_attempts,
        retry_delay.unwrap_or(Duration::ZERO),
        cfg.backoff_multiplier,
    );
    if let Some(cap) = max_retry_delay {
        retry = retry.with_max_backoff(cap);
    }

    Ok(RunSettings {
        max_concurrency: cfg.max_concurrency,
        retry,
        task_timeout,
        logical_date,
    })
}

fn validate_warehouse_section(cfg: &WarehouseSection) -> Result<WarehouseSettings> {
    if cfg.cmd.trim().is_empty() {
        return Err(config_error("[warehouse].cmd must not be empty"));
    }
    if cfg.pool_size == 0 {
        return Err(config_error("[warehouse].pool_size must be >= 1 (got 0)"));
    }
    Ok(WarehouseSettings {
        cmd: cfg.cmd.clone(),
        pool_size: cfg.pool_size,
        statement_timeout: duration_field(
            "[warehouse]",
            "statement_timeout",
            cfg.statement_timeout.as_deref(),
        )?,
    })
}

fn build_task(
    name: &str,
    task: &TaskConfig,
    templates: &SqlTemplates,
    run_retry: &RetryPolicy,
) -> Result<TaskSpec> {
    let required = |field: &str, value: &Option<String>| -> Result<String> {
        value
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                config_error(format!(
                    "task '{name}' of kind {:?} requires `{field}`",
                    task.kind
                ))
            })
    };

    let params = match task.kind {
        TaskKindConfig::Barrier => TaskParams::Barrier,
        TaskKindConfig::Stage => {
            let format = match task.format {
                FormatConfig::Json => StageFormat::Json {
                    json_path: task.json_path.clone().unwrap_or_else(|| "auto".to_string()),
                    options: task.json_options.clone(),
                },
                FormatConfig::Csv => StageFormat::Csv {
                    delimiter: task.delimiter.unwrap_or(','),
                    ignore_header: task.ignore_header.unwrap_or(1),
                },
            };
            let spec = TaskSpec::stage(
                name,
                required("table", &task.table)?,
                required("source", &task.source)?,
                format,
            );
            spec.params
        }
        TaskKindConfig::Fact | TaskKindConfig::Dimension => {
            let set = if task.kind == TaskKindConfig::Fact {
                TemplateSet::Fact
            } else {
                TemplateSet::Dimension
            };
            let table = required("table", &task.table)?;
            let key = task.template.clone().unwrap_or_else(|| table.clone());
            let select = templates.get(set, &key).ok_or_else(|| {
                config_error(format!(
                    "task '{name}' references unknown {set} template '{key}'"
                ))
            })?;
            TaskParams::Load(LoadParams::new(set, table, select).with_mode(task.mode))
        }
        TaskKindConfig::Sql => {
            if task.statements.iter().all(|s| s.trim().is_empty()) {
                return Err(config_error(format!(
                    "sql task '{name}' must define at least one statement"
                )));
            }
            TaskParams::Sql(
                task.statements
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
                    .collect(),
            )
        }
        TaskKindConfig::Quality => {
            if task.checks.is_empty() {
                return Err(config_error(format!(
                    "quality task '{name}' must define at least one check"
                )));
            }
            TaskParams::Quality(task.checks.iter().map(build_check).collect())
        }
    };

    let mut spec = TaskSpec::new(name, params);
    if let Some(retry) = task_retry_override(name, task, run_retry)? {
        spec = spec.with_retry(retry);
    }
    Ok(spec)
}

fn build_check(check: &CheckConfig) -> QualityCheck {
    QualityCheck {
        sql: check.sql.clone(),
        expected: check.expected.clone().into(),
        comparison: check.comparison,
    }
}

fn task_retry_override(
    name: &str,
    task: &TaskConfig,
    run_retry: &RetryPolicy,
) -> Result<Option<RetryPolicy>> {
    if task.max_attempts.is_none() && task.retry_delay.is_none() {
        return Ok(None);
    }
    if task.max_attempts == Some(0) {
        return Err(config_error(format!(
            "task '{name}': max_attempts must be >= 1 (got 0)"
        )));
    }

    let section = format!("[task.{name}]");
    let delay = duration_field(&section, "retry_delay", task.retry_delay.as_deref())?;

    Ok(Some(RetryPolicy {
        max_attempts: task.max_attempts.unwrap_or(run_retry.max_attempts),
        backoff_interval: delay.unwrap_or(run_retry.backoff_interval),
        ..*run_retry
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskKind;
    use crate::errors::GraphError;
    use crate::types::LoadMode;
    use crate::warehouse::ScalarValue;

    fn parse(toml_src: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml_src)?;
        ConfigFile::try_from(raw)
    }

    const PIPELINE: &str = r#"
        [config]
        max_attempts = 3
        retry_delay = "5m"

        [templates.fact]
        songplays = "SELECT * FROM staging_events"

        [templates.dimension]
        users = "SELECT DISTINCT userid FROM staging_events"

        [task.start]
        kind = "barrier"

        [task.stage_events]
        kind = "stage"
        after = ["start"]
        table = "staging_events"
        source = "s3://udacity-dend/log_data/{year}/{month}"
        json_path = "s3://udacity-dend/log_json_path.json"

        [task.load_songplays]
        kind = "fact"
        after = ["stage_events"]
        table = "songplays"
        mode = "append"

        [task.load_users]
        kind = "dimension"
        after = ["load_songplays"]
        table = "users"
        max_attempts = 1

        [task.quality]
        kind = "quality"
        after = ["load_users"]
        checks = [
            { sql = "SELECT COUNT(*) FROM users WHERE userid IS NULL", expected = 0 },
            { sql = "SELECT COUNT(*) FROM songplays", expected = 0, comparison = "not_equal" },
        ]
    "#;

    #[test]
    fn builds_pipeline() {
        let cfg = parse(PIPELINE).unwrap();
        assert_eq!(cfg.dag.len(), 5);
        assert_eq!(cfg.dag.start(), "start");
        assert_eq!(cfg.run.retry.max_attempts, 3);
        assert_eq!(cfg.run.retry.backoff_interval, Duration::from_secs(300));

        let fact = cfg.dag.task("load_songplays").unwrap();
        assert_eq!(fact.kind(), TaskKind::FactLoad);
        match &fact.params {
            TaskParams::Load(p) => {
                assert_eq!(p.select_sql, "SELECT * FROM staging_events");
                assert_eq!(p.mode, LoadMode::Append);
            }
            other => panic!("unexpected params {other:?}"),
        }

        let users = cfg.dag.task("load_users").unwrap();
        assert_eq!(users.retry.map(|r| r.max_attempts), Some(1));
        assert_eq!(
            users.retry.map(|r| r.backoff_interval),
            Some(Duration::from_secs(300))
        );

        match &cfg.dag.task("quality").unwrap().params {
            TaskParams::Quality(checks) => {
                assert_eq!(checks.len(), 2);
                assert_eq!(checks[0].expected, ScalarValue::Int(0));
                assert_eq!(checks[1].comparison, crate::types::Comparison::NotEqual);
            }
            other => panic!("unexpected params {other:?}"),
        }
    }

    #[test]
    fn unknown_template_is_rejected() {
        let err = parse(
            r#"
            [task.load_users]
            kind = "dimension"
            table = "users"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown dimension template 'users'"));
    }

    #[test]
    fn empty_quality_task_is_rejected() {
        let err = parse(
            r#"
            [task.quality]
            kind = "quality"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LoaddagError::ConfigError(_)));
    }

    #[test]
    fn dangling_after_is_a_graph_error() {
        let err = parse(
            r#"
            [task.end]
            kind = "barrier"
            after = ["nope"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LoaddagError::Graph(GraphError::UnknownTask { .. })
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = parse(
            r#"
            [config]
            max_concurrency = 0

            [task.start]
            kind = "barrier"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn sql_task_keeps_statement_order() {
        let cfg = parse(
            r#"
            [task.create_tables]
            kind = "sql"
            statements = [
                "CREATE TABLE IF NOT EXISTS staging_events (artist VARCHAR)",
                "",
                "CREATE TABLE IF NOT EXISTS users (userid INT)",
            ]
            "#,
        )
        .unwrap();

        let task = cfg.dag.task("create_tables").unwrap();
        assert_eq!(task.kind(), TaskKind::Sql);
        assert_eq!(
            task.params,
            TaskParams::Sql(vec![
                "CREATE TABLE IF NOT EXISTS staging_events (artist VARCHAR)".to_string(),
                "CREATE TABLE IF NOT EXISTS users (userid INT)".to_string(),
            ])
        );
    }

    #[test]
    fn sql_task_without_statements_is_rejected() {
        let err = parse(
            r#"
            [task.create_tables]
            kind = "sql"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one statement"));
    }

    #[test]
    fn no_tasks_is_rejected() {
        assert!(parse("[config]\nmax_attempts = 2\n").is_err());
    }
}
