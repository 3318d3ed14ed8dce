// src/dag/builder.rs

//! Explicit DAG construction.
//!
//! Wiring is an edge list validated once in [`DagBuilder::build`]:
//!
//! ```
//! use loaddag::dag::{DagBuilder, TaskSpec};
//!
//! let dag = DagBuilder::new()
//!     .task(TaskSpec::barrier("begin"))
//!     .task(TaskSpec::barrier("a"))
//!     .task(TaskSpec::barrier("b"))
//!     .task(TaskSpec::barrier("end"))
//!     .fan_out("begin", ["a", "b"])
//!     .fan_in(["a", "b"], "end")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(dag.start(), "begin");
//! ```

use crate::dag::graph::Dag;
use crate::dag::task::{TaskName, TaskSpec};
use crate::errors::GraphError;

#[derive(Debug, Clone, Default)]
pub struct DagBuilder {
    tasks: Vec<TaskSpec>,
    edges: Vec<(TaskName, TaskName)>,
    start: Option<TaskName>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn add_task(&mut self, task: TaskSpec) -> &mut Self {
        self.tasks.push(task);
        self
    }

    /// `downstream` runs only after `upstream` succeeded.
    pub fn edge(mut self, upstream: impl Into<TaskName>, downstream: impl Into<TaskName>) -> Self {
        self.add_edge(upstream, downstream);
        self
    }

    pub fn add_edge(
        &mut self,
        upstream: impl Into<TaskName>,
        downstream: impl Into<TaskName>,
    ) -> &mut Self {
        self.edges.push((upstream.into(), downstream.into()));
        self
    }

    /// One upstream, several downstreams.
    pub fn fan_out<I, S>(mut self, upstream: &str, downstreams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        for down in downstreams {
            self.add_edge(upstream, down);
        }
        self
    }

    /// Several upstreams, one downstream.
    pub fn fan_in<I, S>(mut self, upstreams: I, downstream: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        for up in upstreams {
            self.add_edge(up, downstream);
        }
        self
    }

    /// Name the start task explicitly instead of inferring it.
    pub fn start(mut self, name: impl Into<TaskName>) -> Self {
        self.start = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Dag, GraphError> {
        Dag::build_with_start(self.tasks, self.edges, self.start.as_deref())
    }
}
