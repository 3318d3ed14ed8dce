// src/exec/mod.rs

//! Task execution layer.
//!
//! Every task kind has a [`TaskExecutor`] that turns the task's parameters
//! into warehouse statements. The runtime never talks SQL itself; it looks up
//! the executor for a task kind in an [`ExecutorRegistry`] and awaits it.
//!
//! - [`stage`] clears a staging table and bulk-copies the source into it.
//! - [`load`] rebuilds (or appends to) a fact or dimension table.
//! - [`quality`] evaluates every data-quality predicate of a task.
//! - [`sql`] runs a fixed list of statements, typically `CREATE TABLE`s.
//! - [`barrier`] is the no-op used for start/end markers.
//! - [`template`] renders source locators against the logical date.
//! - [`context`] holds what an executor sees while running one attempt.

pub mod barrier;
pub mod context;
pub mod load;
pub mod quality;
pub mod sql;
pub mod stage;
pub mod template;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dag::TaskKind;
use crate::errors::TaskError;
use crate::types::BoxFuture;

pub use barrier::BarrierExecutor;
pub use context::{Credentials, RunContext, TaskContext};
pub use load::{SqlTemplates, TableLoadExecutor};
pub use quality::QualityCheckExecutor;
pub use sql::SqlExecutor;
pub use stage::StageLoadExecutor;

/// Runs one attempt of a task.
///
/// Implementations check out their own connection through
/// [`TaskContext::connection`] so that tasks which never touch the warehouse
/// don't hold a pool slot.
pub trait TaskExecutor: Send + Sync {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>>;
}

/// Task kind to executor mapping used by the runtime.
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.executors.keys().collect();
        kinds.sort();
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::empty()
            .with(TaskKind::StageLoad, StageLoadExecutor)
            .with(TaskKind::FactLoad, TableLoadExecutor)
            .with(TaskKind::DimensionLoad, TableLoadExecutor)
            .with(TaskKind::QualityCheck, QualityCheckExecutor)
            .with(TaskKind::Sql, SqlExecutor)
            .with(TaskKind::Barrier, BarrierExecutor)
    }
}

impl ExecutorRegistry {
    /// Registry without any executors.
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register (or replace) the executor for `kind`.
    pub fn with(mut self, kind: TaskKind, executor: impl TaskExecutor + 'static) -> Self {
        self.executors.insert(kind, Arc::new(executor));
        self
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_kind() {
        let registry = ExecutorRegistry::default();
        for kind in [
            TaskKind::StageLoad,
            TaskKind::FactLoad,
            TaskKind::DimensionLoad,
            TaskKind::QualityCheck,
            TaskKind::Sql,
            TaskKind::Barrier,
        ] {
            assert!(registry.get(kind).is_some(), "missing executor for {kind}");
        }
    }

    #[test]
    fn empty_registry_has_nothing() {
        assert!(ExecutorRegistry::empty().get(TaskKind::Barrier).is_none());
    }
}
