// src/dag/task.rs

//! Task descriptions: kind, kind-specific parameters, retry override.

use std::fmt;

use crate::engine::RetryPolicy;
use crate::types::{Comparison, LoadMode, TemplateSet};
use crate::warehouse::ScalarValue;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Closed set of task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    StageLoad,
    FactLoad,
    DimensionLoad,
    QualityCheck,
    Sql,
    Barrier,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::StageLoad => "stage",
            TaskKind::FactLoad => "fact",
            TaskKind::DimensionLoad => "dimension",
            TaskKind::QualityCheck => "quality",
            TaskKind::Sql => "sql",
            TaskKind::Barrier => "barrier",
        };
        f.pad(s)
    }
}

/// Immutable description of one task in the DAG.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub name: TaskName,
    pub params: TaskParams,
    /// Overrides the run-wide retry policy when set.
    pub retry: Option<RetryPolicy>,
}

/// Kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParams {
    Stage(StageParams),
    Load(LoadParams),
    Quality(Vec<QualityCheck>),
    /// Statements run in order on one connection, e.g. schema DDL.
    Sql(Vec<String>),
    Barrier,
}

impl TaskSpec {
    pub fn new(name: impl Into<TaskName>, params: TaskParams) -> Self {
        Self {
            name: name.into(),
            params,
            retry: None,
        }
    }

    /// No-op marker task.
    pub fn barrier(name: impl Into<TaskName>) -> Self {
        Self::new(name, TaskParams::Barrier)
    }

    pub fn stage(
        name: impl Into<TaskName>,
        table: impl Into<String>,
        source: impl Into<String>,
        format: StageFormat,
    ) -> Self {
        Self::new(
            name,
            TaskParams::Stage(StageParams {
                table: table.into(),
                source: source.into(),
                format,
            }),
        )
    }

    pub fn fact(
        name: impl Into<TaskName>,
        table: impl Into<String>,
        select_sql: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            TaskParams::Load(LoadParams::new(TemplateSet::Fact, table, select_sql)),
        )
    }

    pub fn dimension(
        name: impl Into<TaskName>,
        table: impl Into<String>,
        select_sql: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            TaskParams::Load(LoadParams::new(TemplateSet::Dimension, table, select_sql)),
        )
    }

    pub fn quality(name: impl Into<TaskName>, checks: Vec<QualityCheck>) -> Self {
        Self::new(name, TaskParams::Quality(checks))
    }

    pub fn sql<I, S>(name: impl Into<TaskName>, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            TaskParams::Sql(statements.into_iter().map(Into::into).collect()),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn kind(&self) -> TaskKind {
        match &self.params {
            TaskParams::Stage(_) => TaskKind::StageLoad,
            TaskParams::Load(p) => match p.template_set {
                TemplateSet::Fact => TaskKind::FactLoad,
                TemplateSet::Dimension => TaskKind::DimensionLoad,
            },
            TaskParams::Quality(_) => TaskKind::QualityCheck,
            TaskParams::Sql(_) => TaskKind::Sql,
            TaskParams::Barrier => TaskKind::Barrier,
        }
    }
}

/// Parameters for a bulk copy into a staging table.
#[derive(Debug, Clone, PartialEq)]
pub struct StageParams {
    pub table: String,
    /// Source locator, e.g. `s3://bucket/log_data/{year}/{month}/{ds}-events.json`.
    pub source: String,
    pub format: StageFormat,
}

/// Input format options for the bulk copy.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFormat {
    Json {
        /// `auto` or a JSONPaths file locator.
        json_path: String,
        /// Extra trailing options such as `truncatecolumns`.
        options: Vec<String>,
    },
    Csv {
        delimiter: char,
        ignore_header: u32,
    },
}

impl StageFormat {
    pub fn json_auto() -> Self {
        StageFormat::Json {
            json_path: "auto".to_string(),
            options: Vec::new(),
        }
    }
}

impl Default for StageFormat {
    fn default() -> Self {
        StageFormat::json_auto()
    }
}

/// Parameters for a fact or dimension load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadParams {
    pub template_set: TemplateSet,
    pub table: String,
    /// `SELECT` body producing the rows; `{table}` is substituted.
    pub select_sql: String,
    pub mode: LoadMode,
}

impl LoadParams {
    pub fn new(
        template_set: TemplateSet,
        table: impl Into<String>,
        select_sql: impl Into<String>,
    ) -> Self {
        Self {
            template_set,
            table: table.into(),
            select_sql: select_sql.into(),
            mode: LoadMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A data-quality predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityCheck {
    pub sql: String,
    pub expected: ScalarValue,
    pub comparison: Comparison,
}

impl QualityCheck {
    pub fn equals(sql: impl Into<String>, expected: impl Into<ScalarValue>) -> Self {
        Self {
            sql: sql.into(),
            expected: expected.into(),
            comparison: Comparison::Equal,
        }
    }

    pub fn not_equals(sql: impl Into<String>, expected: impl Into<ScalarValue>) -> Self {
        Self {
            sql: sql.into(),
            expected: expected.into(),
            comparison: Comparison::NotEqual,
        }
    }

    /// Whether `observed` satisfies this predicate.
    pub fn holds(&self, observed: &ScalarValue) -> bool {
        let equal = self.expected.same_value(observed);
        match self.comparison {
            Comparison::Equal => equal,
            Comparison::NotEqual => !equal,
        }
    }
}

/// What a quality check saw when it was evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Value(ScalarValue),
    NoRows,
    Error(String),
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Value(v) => write!(f, "{v}"),
            Observation::NoRows => f.write_str("no rows"),
            Observation::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// A predicate that did not hold, with what was observed instead.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCheck {
    pub check: QualityCheck,
    pub observed: Observation,
}

impl fmt::Display for FailedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}`: expected {} {}, observed {}",
            self.check.sql, self.check.comparison, self.check.expected, self.observed
        )
    }
}
