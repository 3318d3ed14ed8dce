// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use tracing::debug;

use crate::dag::task::{TaskName, TaskSpec};
use crate::errors::GraphError;

static NO_TASKS: BTreeSet<TaskName> = BTreeSet::new();

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: tasks that must succeed before this one can run.
    deps: BTreeSet<TaskName>,
    /// Direct dependents: tasks that depend on this one.
    dependents: BTreeSet<TaskName>,
}

/// Validated, immutable task graph.
///
/// Construction guarantees:
/// - task names are unique
/// - every edge endpoint is a known task
/// - the graph is acyclic
/// - there is exactly one start task and every task is reachable from it
///
/// All maps are ordered by task name, so every query that returns several
/// names returns them in ascending order.
#[derive(Debug, Clone)]
pub struct Dag {
    tasks: BTreeMap<TaskName, TaskSpec>,
    nodes: BTreeMap<TaskName, DagNode>,
    start: TaskName,
    topo_order: Vec<TaskName>,
}

impl Dag {
    /// Build a DAG whose start task is its single task without upstreams.
    pub fn build(tasks: Vec<TaskSpec>, edges: Vec<(TaskName, TaskName)>) -> Result<Self, GraphError> {
        Self::build_with_start(tasks, edges, None)
    }

    /// Build a DAG, optionally naming the start task explicitly.
    ///
    /// With an explicit start, any other task without upstreams is reported as
    /// unreachable.
    pub fn build_with_start(
        tasks: Vec<TaskSpec>,
        edges: Vec<(TaskName, TaskName)>,
        start: Option<&str>,
    ) -> Result<Self, GraphError> {
        if tasks.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut by_name: BTreeMap<TaskName, TaskSpec> = BTreeMap::new();
        for task in tasks {
            let name = task.name.clone();
            if by_name.insert(name.clone(), task).is_some() {
                return Err(GraphError::DuplicateTask(name));
            }
        }

        let mut nodes: BTreeMap<TaskName, DagNode> = by_name
            .keys()
            .map(|name| (name.clone(), DagNode::default()))
            .collect();

        for (upstream, downstream) in edges {
            for endpoint in [&upstream, &downstream] {
                if !nodes.contains_key(endpoint) {
                    return Err(GraphError::UnknownTask {
                        upstream: upstream.clone(),
                        downstream: downstream.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
            if upstream == downstream {
                return Err(GraphError::SelfLoop(upstream));
            }
            if let Some(node) = nodes.get_mut(&downstream) {
                node.deps.insert(upstream.clone());
            }
            if let Some(node) = nodes.get_mut(&upstream) {
                node.dependents.insert(downstream);
            }
        }

        let start = {
            // Edge direction: upstream -> downstream.
            let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
            for name in nodes.keys() {
                graph.add_node(name.as_str());
            }
            for (name, node) in nodes.iter() {
                for dep in node.deps.iter() {
                    graph.add_edge(dep.as_str(), name.as_str(), ());
                }
            }

            // A topological sort fails if there is a cycle.
            if let Err(cycle) = toposort(&graph, None) {
                return Err(GraphError::Cycle(cycle.node_id().to_string()));
            }

            let start = find_start(&nodes, start)?;

            let mut reached: BTreeSet<&str> = BTreeSet::new();
            let mut dfs = Dfs::new(&graph, start);
            while let Some(node) = dfs.next(&graph) {
                reached.insert(node);
            }
            let unreachable: Vec<TaskName> = nodes
                .keys()
                .filter(|name| !reached.contains(name.as_str()))
                .cloned()
                .collect();
            if !unreachable.is_empty() {
                return Err(GraphError::Unreachable {
                    start: start.to_string(),
                    unreachable,
                });
            }
            start.to_string()
        };

        let topo_order = ordered_toposort(&nodes);
        debug!(tasks = nodes.len(), start = %start, "built DAG");

        Ok(Self {
            tasks: by_name,
            nodes,
            start,
            topo_order,
        })
    }

    /// Name of the start task.
    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.get(name)
    }

    /// All tasks, ordered by name.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskSpec> {
        self.tasks.values()
    }

    /// All task names, ascending.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    /// Immediate upstream tasks of `name`.
    pub fn dependencies(&self, name: &str) -> &BTreeSet<TaskName> {
        self.nodes.get(name).map(|n| &n.deps).unwrap_or(&NO_TASKS)
    }

    /// Immediate downstream tasks of `name`.
    pub fn dependents(&self, name: &str) -> &BTreeSet<TaskName> {
        self.nodes.get(name).map(|n| &n.dependents).unwrap_or(&NO_TASKS)
    }

    /// Every task downstream of `name`, excluding `name` itself.
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<TaskName> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(name).iter().map(|s| s.as_str()).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependents(next).iter().map(|s| s.as_str()));
            }
        }
        seen
    }

    /// Tasks not yet in `completed` whose every upstream is in `completed`,
    /// ascending by name.
    ///
    /// The DAG holds no run state, so tasks that are already in flight are
    /// returned too; the scheduler filters those out by status.
    pub fn ready_tasks(&self, completed: &BTreeSet<TaskName>) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(name, node)| {
                !completed.contains(*name) && node.deps.iter().all(|d| completed.contains(d))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Topological order, breaking ties by task name.
    pub fn topological_order(&self) -> &[TaskName] {
        &self.topo_order
    }

    /// All edges as `(upstream, downstream)`, ordered.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes.iter().flat_map(|(name, node)| {
            node.dependents
                .iter()
                .map(move |down| (name.as_str(), down.as_str()))
        })
    }
}

fn find_start<'n>(
    nodes: &'n BTreeMap<TaskName, DagNode>,
    designated: Option<&str>,
) -> Result<&'n str, GraphError> {
    if let Some(name) = designated {
        return match nodes.get_key_value(name) {
            None => Err(GraphError::UnknownStart(name.to_string())),
            Some((_, node)) if !node.deps.is_empty() => {
                Err(GraphError::StartHasUpstream(name.to_string()))
            }
            Some((key, _)) => Ok(key.as_str()),
        };
    }

    let roots: Vec<&str> = nodes
        .iter()
        .filter(|(_, node)| node.deps.is_empty())
        .map(|(name, _)| name.as_str())
        .collect();

    match roots.as_slice() {
        [only] => Ok(*only),
        _ => Err(GraphError::MultipleStartTasks(
            roots.iter().map(|s| s.to_string()).collect(),
        )),
    }
}

/// Kahn's algorithm with a name-ordered ready set.
fn ordered_toposort(nodes: &BTreeMap<TaskName, DagNode>) -> Vec<TaskName> {
    let mut indegree: BTreeMap<&str, usize> = nodes
        .iter()
        .map(|(name, node)| (name.as_str(), node.deps.len()))
        .collect();
    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        if let Some(node) = nodes.get(name) {
            for dependent in node.dependents.iter() {
                if let Some(deg) = indegree.get_mut(dependent.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(xs: &[&str]) -> Vec<TaskSpec> {
        xs.iter().map(|n| TaskSpec::barrier(*n)).collect()
    }

    fn edges(xs: &[(&str, &str)]) -> Vec<(TaskName, TaskName)> {
        xs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    fn diamond() -> Dag {
        Dag::build(
            names(&["start", "b", "a", "end"]),
            edges(&[("start", "b"), ("start", "a"), ("a", "end"), ("b", "end")]),
        )
        .unwrap()
    }

    #[test]
    fn cycle_is_rejected() {
        let err = Dag::build(
            names(&["s", "a", "b"]),
            edges(&[("s", "a"), ("a", "b"), ("b", "a")]),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(ref n) if n == "a" || n == "b"));
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let err = Dag::build(names(&["s"]), edges(&[("s", "ghost")])).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownTask {
                upstream: "s".into(),
                downstream: "ghost".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn duplicates_and_self_loops_are_rejected() {
        assert_eq!(
            Dag::build(names(&["s", "s"]), vec![]).unwrap_err(),
            GraphError::DuplicateTask("s".into())
        );
        assert_eq!(
            Dag::build(names(&["s"]), edges(&[("s", "s")])).unwrap_err(),
            GraphError::SelfLoop("s".into())
        );
        assert_eq!(Dag::build(vec![], vec![]).unwrap_err(), GraphError::Empty);
    }

    #[test]
    fn start_must_be_unique_and_reach_everything() {
        assert_eq!(
            Dag::build(names(&["a", "b"]), vec![]).unwrap_err(),
            GraphError::MultipleStartTasks(vec!["a".into(), "b".into()])
        );

        let err = Dag::build_with_start(
            names(&["start", "x", "orphan"]),
            edges(&[("start", "x")]),
            Some("start"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::Unreachable {
                start: "start".into(),
                unreachable: vec!["orphan".into()],
            }
        );

        assert_eq!(
            Dag::build_with_start(names(&["s", "x"]), edges(&[("s", "x")]), Some("x"))
                .unwrap_err(),
            GraphError::StartHasUpstream("x".into())
        );
    }

    #[test]
    fn ready_tasks_are_sorted_and_respect_dependencies() {
        let dag = diamond();
        let mut completed = BTreeSet::new();
        assert_eq!(dag.ready_tasks(&completed), vec!["start"]);

        completed.insert("start".to_string());
        assert_eq!(dag.ready_tasks(&completed), vec!["a", "b"]);

        completed.insert("a".to_string());
        assert_eq!(dag.ready_tasks(&completed), vec!["b"]);

        completed.insert("b".to_string());
        assert_eq!(dag.ready_tasks(&completed), vec!["end"]);
    }

    #[test]
    fn adjacency_queries() {
        let dag = diamond();
        assert_eq!(dag.start(), "start");
        assert_eq!(
            dag.dependencies("end").iter().cloned().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(
            dag.dependents("start").iter().cloned().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(dag.dependencies("missing").is_empty());
        assert_eq!(
            dag.transitive_dependents("a").into_iter().collect::<Vec<_>>(),
            vec!["end"]
        );
        assert_eq!(dag.topological_order(), &["start", "a", "b", "end"]);
        assert_eq!(dag.edges().count(), 4);
    }
}
