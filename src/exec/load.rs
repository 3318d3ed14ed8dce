// src/exec/load.rs

//! Fact and dimension loads.
//!
//! Both kinds run the same statements; they only differ in which template set
//! their `SELECT` body came from, so one executor serves both.

use std::collections::BTreeMap;

use tracing::info;

use crate::dag::{LoadParams, TaskParams};
use crate::errors::TaskError;
use crate::types::{BoxFuture, LoadMode, TemplateSet};

use super::{TaskContext, TaskExecutor};

/// Named `SELECT` bodies, one map per template set, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlTemplates {
    fact: BTreeMap<String, String>,
    dimension: BTreeMap<String, String>,
}

impl SqlTemplates {
    pub fn new(fact: BTreeMap<String, String>, dimension: BTreeMap<String, String>) -> Self {
        Self { fact, dimension }
    }

    pub fn insert(&mut self, set: TemplateSet, key: impl Into<String>, sql: impl Into<String>) {
        self.set_mut(set).insert(key.into(), sql.into());
    }

    pub fn get(&self, set: TemplateSet, key: &str) -> Option<&str> {
        let map = match set {
            TemplateSet::Fact => &self.fact,
            TemplateSet::Dimension => &self.dimension,
        };
        map.get(key).map(String::as_str)
    }

    fn set_mut(&mut self, set: TemplateSet) -> &mut BTreeMap<String, String> {
        match set {
            TemplateSet::Fact => &mut self.fact,
            TemplateSet::Dimension => &mut self.dimension,
        }
    }
}

/// Statements issued for one load, in order.
pub fn load_statements(params: &LoadParams) -> Vec<String> {
    let select = params.select_sql.replace("{table}", &params.table);
    let insert = format!("INSERT INTO {} {}", params.table, select.trim());

    match params.mode {
        LoadMode::Truncate => vec![format!("DELETE FROM {}", params.table), insert],
        LoadMode::Append => vec![insert],
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableLoadExecutor;

impl TaskExecutor for TableLoadExecutor {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            let TaskParams::Load(params) = &ctx.task.params else {
                return Err(TaskError::load(format!(
                    "task '{}' has no load parameters",
                    ctx.task.name
                )));
            };

            let conn = ctx.connection().await?;

            info!(
                task = %ctx.task.name,
                table = %params.table,
                set = %params.template_set,
                mode = ?params.mode,
                "loading table"
            );
            for statement in load_statements(params) {
                ctx.ensure_time_left()?;
                conn.execute(&statement)
                    .await
                    .map_err(|e| TaskError::load(format!("loading {}: {e}", params.table)))?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_deletes_before_insert() {
        let params = LoadParams::new(
            TemplateSet::Dimension,
            "users",
            "SELECT DISTINCT userid, firstname FROM staging_events",
        );
        assert_eq!(
            load_statements(&params),
            vec![
                "DELETE FROM users".to_string(),
                "INSERT INTO users SELECT DISTINCT userid, firstname FROM staging_events".to_string(),
            ]
        );
    }

    #[test]
    fn append_skips_delete_and_substitutes_table() {
        let params = LoadParams::new(
            TemplateSet::Fact,
            "songplays",
            "\n  SELECT * FROM staging_events WHERE NOT EXISTS (SELECT 1 FROM {table})\n",
        )
        .with_mode(LoadMode::Append);
        assert_eq!(
            load_statements(&params),
            vec![
                "INSERT INTO songplays SELECT * FROM staging_events WHERE NOT EXISTS (SELECT 1 FROM songplays)"
                    .to_string()
            ]
        );
    }

    #[test]
    fn templates_are_keyed_per_set() {
        let mut templates = SqlTemplates::default();
        templates.insert(TemplateSet::Fact, "songplays", "SELECT 1");
        assert_eq!(templates.get(TemplateSet::Fact, "songplays"), Some("SELECT 1"));
        assert_eq!(templates.get(TemplateSet::Dimension, "songplays"), None);
    }
}
