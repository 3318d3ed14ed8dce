// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dag::Dag;
use crate::engine::{RetryPolicy, RunConfig};
use crate::types::{Comparison, LoadMode};
use crate::warehouse::ScalarValue;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// max_concurrency = 4
/// max_attempts = 3
/// retry_delay = "5m"
///
/// [warehouse]
/// cmd = "psql \"$REDSHIFT_DSN\" -tA -v ON_ERROR_STOP=1"
///
/// [credentials]
/// access_key_env = "AWS_ACCESS_KEY_ID"
/// secret_key_env = "AWS_SECRET_ACCESS_KEY"
///
/// [templates.dimension]
/// users = "SELECT DISTINCT userid, firstname, lastname, gender, level FROM staging_events"
///
/// [task.start]
/// kind = "sql"
/// statements = ["CREATE TABLE IF NOT EXISTS users (userid INT, firstname VARCHAR)"]
///
/// [task.stage_events]
/// kind = "stage"
/// after = ["start"]
/// table = "staging_events"
/// source = "s3://udacity-dend/log_data/{year}/{month}"
/// json_path = "s3://udacity-dend/log_json_path.json"
///
/// [task.load_users]
/// kind = "dimension"
/// after = ["stage_events"]
/// table = "users"
/// ```
///
/// This is the unvalidated form; convert it into a [`ConfigFile`] with
/// `ConfigFile::try_from`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Run-wide settings from `[config]`.
    #[serde(default)]
    pub config: RunSection,

    /// How to reach the warehouse. Only required to actually run.
    #[serde(default)]
    pub warehouse: Option<WarehouseSection>,

    /// Where to find the bulk-source credentials.
    #[serde(default)]
    pub credentials: Option<CredentialsSection>,

    /// Named `SELECT` bodies for fact and dimension loads.
    #[serde(default)]
    pub templates: TemplatesSection,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Total attempts per task, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Duration string such as `"5m"` or `"250ms"`.
    #[serde(default)]
    pub retry_delay: Option<String>,

    /// `1.0` keeps the delay fixed.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default)]
    pub max_retry_delay: Option<String>,

    /// Per-attempt time limit.
    #[serde(default)]
    pub task_timeout: Option<String>,

    /// `YYYY-MM-DD` or an RFC 3339 timestamp. The CLI flag wins.
    #[serde(default)]
    pub logical_date: Option<String>,

    /// Name of the start task, when it should not be inferred.
    #[serde(default)]
    pub start: Option<String>,
}

fn default_max_concurrency() -> usize {
    crate::engine::DEFAULT_MAX_CONCURRENCY
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delay: None,
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_delay: None,
            task_timeout: None,
            logical_date: None,
            start: None,
        }
    }
}

/// `[warehouse]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseSection {
    /// Shell command that reads one SQL statement on stdin.
    pub cmd: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub statement_timeout: Option<String>,
}

fn default_pool_size() -> usize {
    4
}

/// `[credentials]` section: names of environment variables, never the
/// secrets themselves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CredentialsSection {
    pub access_key_env: String,
    pub secret_key_env: String,
}

/// `[templates.fact]` / `[templates.dimension]`: table name to `SELECT`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatesSection {
    #[serde(default)]
    pub fact: BTreeMap<String, String>,
    #[serde(default)]
    pub dimension: BTreeMap<String, String>,
}

/// Value of `kind = "..."` in a task section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKindConfig {
    Stage,
    Fact,
    Dimension,
    Quality,
    Sql,
    Barrier,
}

/// Value of `format = "..."` in a stage task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatConfig {
    #[default]
    Json,
    Csv,
}

/// `[task.<name>]` section.
///
/// One flat table for every kind; fields that do not apply to a kind are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub kind: TaskKindConfig,

    /// Upstream tasks; this task waits for all of them.
    #[serde(default)]
    pub after: Vec<String>,

    /// Destination table (stage, fact, dimension).
    #[serde(default)]
    pub table: Option<String>,

    /// Source locator template (stage).
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub format: FormatConfig,

    /// JSONPaths locator; `auto` when omitted.
    #[serde(default)]
    pub json_path: Option<String>,

    /// Extra COPY options appended after the JSON format clause.
    #[serde(default)]
    pub json_options: Vec<String>,

    #[serde(default)]
    pub delimiter: Option<char>,

    #[serde(default)]
    pub ignore_header: Option<u32>,

    /// Template key (fact, dimension); defaults to `table`.
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub mode: LoadMode,

    /// Quality predicates, evaluated in order.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,

    /// Statements of a `sql` task, run in order.
    #[serde(default)]
    pub statements: Vec<String>,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub retry_delay: Option<String>,
}

/// One entry of `checks = [...]`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub sql: String,
    pub expected: ExpectedValue,
    #[serde(default)]
    pub comparison: Comparison,
}

/// Expected value of a check as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<ExpectedValue> for ScalarValue {
    fn from(value: ExpectedValue) -> Self {
        match value {
            ExpectedValue::Bool(b) => ScalarValue::Bool(b),
            ExpectedValue::Int(i) => ScalarValue::Int(i),
            ExpectedValue::Float(f) => ScalarValue::Float(f),
            ExpectedValue::Text(s) => ScalarValue::Text(s),
        }
    }
}

/// Run-wide settings after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub task_timeout: Option<Duration>,
    pub logical_date: Option<DateTime<Utc>>,
}

/// Warehouse settings after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseSettings {
    pub cmd: String,
    pub pool_size: usize,
    pub statement_timeout: Option<Duration>,
}

/// Validated configuration: settings plus the built DAG.
///
/// Only constructible through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub run: RunSettings,
    pub warehouse: Option<WarehouseSettings>,
    pub credentials: Option<CredentialsSection>,
    pub dag: Dag,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        run: RunSettings,
        warehouse: Option<WarehouseSettings>,
        credentials: Option<CredentialsSection>,
        dag: Dag,
    ) -> Self {
        Self {
            run,
            warehouse,
            credentials,
            dag,
        }
    }

    /// Settings for one run.
    ///
    /// The logical date is `logical_date` if given, then `[config].logical_date`,
    /// then the current time.
    pub fn run_config(&self, logical_date: Option<DateTime<Utc>>) -> RunConfig {
        let date = logical_date
            .or(self.run.logical_date)
            .unwrap_or_else(Utc::now);
        RunConfig::new(date)
            .with_max_concurrency(self.run.max_concurrency)
            .with_retry(self.run.retry)
            .with_task_timeout(self.run.task_timeout)
    }
}
