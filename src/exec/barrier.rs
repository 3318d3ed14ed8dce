// src/exec/barrier.rs

use tracing::debug;

use crate::errors::TaskError;
use crate::types::BoxFuture;

use super::{TaskContext, TaskExecutor};

/// Marker task: succeeds immediately without touching the warehouse.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarrierExecutor;

impl TaskExecutor for BarrierExecutor {
    fn execute<'a>(&'a self, ctx: &'a TaskContext<'a>) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            debug!(task = %ctx.task.name, "barrier reached");
            Ok(())
        })
    }
}
