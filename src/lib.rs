// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod report;
pub mod types;
pub mod warehouse;

use std::fmt::Write as _;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::parse_logical_date;
use crate::dag::{Dag, TaskParams};
use crate::engine::Runtime;
use crate::exec::load::load_statements;
use crate::exec::stage::redacted_copy_statement;
use crate::exec::template::{TemplateError, render_source};
use crate::exec::{Credentials, RunContext};
use crate::types::RunOutcome;
use crate::warehouse::{ShellWarehouse, WarehouseClient, WarehousePool};

pub use crate::engine::{RunConfig, run_dag};
pub use crate::report::RunReport;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - credentials and the warehouse pool
/// - the runtime
/// - Ctrl-C handling
///
/// Returns the run outcome; the report has already been printed to stdout.
pub async fn run(args: CliArgs) -> Result<RunOutcome> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let logical_date = args
        .logical_date
        .as_deref()
        .map(parse_logical_date)
        .transpose()
        .map_err(|e| anyhow!("--logical-date: {e}"))?;

    let mut run_config = cfg.run_config(logical_date);
    if let Some(n) = args.max_concurrency {
        run_config = run_config.with_max_concurrency(n);
    }

    if args.dry_run {
        return Ok(print_dry_run(&cfg, &run_config));
    }

    let credentials = cfg
        .credentials
        .as_ref()
        .map(|c| Credentials::from_env(&c.access_key_env, &c.secret_key_env))
        .transpose()?;

    let warehouse = cfg
        .warehouse
        .as_ref()
        .ok_or_else(|| anyhow!("a [warehouse] section is required to run the DAG"))?;
    let pool = WarehousePool::with_factory(warehouse.pool_size, || -> Box<dyn WarehouseClient> {
        Box::new(ShellWarehouse::new(&warehouse.cmd).with_timeout(warehouse.statement_timeout))
    });
    info!(pool_size = warehouse.pool_size, "warehouse pool ready");

    let runtime = Runtime::new(cfg.dag, run_config, pool).with_credentials(credentials);

    // Ctrl-C: stop dispatching, let in-flight tasks finish.
    let cancel = runtime.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Ctrl-C received; cancelling run");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    let report = runtime.run().await;
    println!("{report}");
    Ok(report.outcome)
}

/// Print the plan and report whether every statement could be rendered.
fn print_dry_run(cfg: &ConfigFile, run_config: &RunConfig) -> RunOutcome {
    // Show which variables the secrets would come from, never their values.
    let credentials = cfg.credentials.as_ref().map(|c| {
        Credentials::new(format!("${}", c.access_key_env), format!("${}", c.secret_key_env))
    });
    let run = RunContext::new(run_config.logical_date).with_credentials(credentials);

    println!("loaddag dry-run");
    println!("  logical_date = {}", run_config.logical_date.to_rfc3339());
    println!("  max_concurrency = {}", run_config.max_concurrency);
    println!("  max_attempts = {}", run_config.retry.max_attempts);
    println!();

    let outcome = match dry_run_plan(&cfg.dag, &run) {
        Ok(plan) => {
            print!("{plan}");
            RunOutcome::Succeeded
        }
        Err(e) => {
            eprintln!("dry-run failed: {e}");
            RunOutcome::Failed
        }
    };

    debug!("dry-run complete (no execution)");
    outcome
}

/// Tasks in topological order with their upstreams and the statements they
/// would issue for `run`.
pub fn dry_run_plan(dag: &Dag, run: &RunContext) -> std::result::Result<String, TemplateError> {
    let mut out = String::new();
    let _ = writeln!(out, "tasks ({}):", dag.len());

    for name in dag.topological_order() {
        let Some(task) = dag.task(name) else {
            continue;
        };
        let _ = writeln!(out, "  - {name} [{}]", task.kind());

        let after = dag.dependencies(name);
        if !after.is_empty() {
            let _ = writeln!(out, "      after: {after:?}");
        }

        let statements = match &task.params {
            TaskParams::Barrier => Vec::new(),
            TaskParams::Stage(params) => {
                let location = render_source(&params.source, &run.logical_date)?;
                vec![
                    format!("DELETE FROM {}", params.table),
                    redacted_copy_statement(params, &location, run.credentials.as_ref()),
                ]
            }
            TaskParams::Load(params) => load_statements(params),
            TaskParams::Sql(statements) => statements.clone(),
            TaskParams::Quality(checks) => checks
                .iter()
                .map(|c| format!("{}  -- expect {} {}", c.sql, c.comparison, c.expected))
                .collect(),
        };
        for statement in statements {
            for line in statement.lines() {
                let _ = writeln!(out, "      {line}");
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{DagBuilder, QualityCheck, StageFormat, TaskSpec};
    use chrono::{TimeZone, Utc};

    #[test]
    fn dry_run_renders_statements_in_order() {
        let dag = DagBuilder::new()
            .task(TaskSpec::barrier("start"))
            .task(TaskSpec::stage(
                "stage_events",
                "staging_events",
                "s3://bucket/log_data/{year}/{month}",
                StageFormat::json_auto(),
            ))
            .task(TaskSpec::quality(
                "quality",
                vec![QualityCheck::equals("SELECT COUNT(*) FROM staging_events", 0)],
            ))
            .edge("start", "stage_events")
            .edge("stage_events", "quality")
            .build()
            .unwrap();
        let run = RunContext::new(Utc.with_ymd_and_hms(2018, 11, 1, 0, 0, 0).unwrap())
            .with_credentials(Some(Credentials::new("AKIA", "secret")));

        let plan = dry_run_plan(&dag, &run).unwrap();

        let start = plan.find("- start").unwrap();
        let stage = plan.find("- stage_events").unwrap();
        let quality = plan.find("- quality").unwrap();
        assert!(start < stage && stage < quality);
        assert!(plan.contains("FROM 's3://bucket/log_data/2018/11'"));
        assert!(plan.contains("-- expect == 0"));
        assert!(!plan.contains("secret"));
    }

    #[test]
    fn dry_run_lists_sql_statements() {
        let dag = DagBuilder::new()
            .task(TaskSpec::sql(
                "create_tables",
                ["CREATE TABLE IF NOT EXISTS users (id INT)"],
            ))
            .build()
            .unwrap();
        let plan = dry_run_plan(&dag, &RunContext::new(Utc::now())).unwrap();
        assert!(plan.contains("- create_tables [sql]"));
        assert!(plan.contains("      CREATE TABLE IF NOT EXISTS users (id INT)"));
    }

    #[test]
    fn dry_run_surfaces_bad_templates() {
        let dag = DagBuilder::new()
            .task(TaskSpec::stage("s", "t", "s3://b/{week}", StageFormat::json_auto()))
            .build()
            .unwrap();
        let run = RunContext::new(Utc::now());
        assert!(dry_run_plan(&dag, &run).is_err());
    }
}
