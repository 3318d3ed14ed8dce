use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::graph::Dag;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::task::TaskName;
use crate::errors::TaskError;
use crate::report::{RunReport, TaskReport};
use crate::types::{RunOutcome, TaskStatus};

/// Why a task never ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The named upstream task failed.
    UpstreamFailed(TaskName),
    /// The run was cancelled before the task was dispatched.
    Cancelled,
}

/// Per-run state of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub status: TaskStatus,
    /// Attempts made so far (0 until dispatched).
    pub attempts: u32,
    pub last_error: Option<TaskError>,
    pub skip_reason: Option<SkipReason>,
    /// Wall time from dispatch to terminal state.
    pub elapsed: Option<Duration>,
}

impl TaskState {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            skip_reason: None,
            elapsed: None,
        }
    }
}

/// Scheduler holds the immutable DAG plus mutable per-run state.
///
/// It is a plain synchronous state machine; the async runtime owns it and is
/// the only writer, so no locking is needed here. It is responsible for:
/// - promoting tasks whose upstreams all succeeded to `Ready`
/// - handing out `Ready` tasks in a deterministic order
/// - recording terminal states and skipping dependents of failed tasks
/// - skipping everything not yet started when the run is cancelled
#[derive(Debug)]
pub struct Scheduler {
    dag: Arc<Dag>,
    states: BTreeMap<TaskName, TaskState>,
    /// Succeeded ∪ Failed ∪ Skipped.
    completed: BTreeSet<TaskName>,
    /// `Ready` tasks, one frontier after another, each frontier sorted by name.
    ready_queue: VecDeque<TaskName>,
    dispatch_order: Vec<TaskName>,
    cancelled: bool,
}

impl Scheduler {
    pub fn new(dag: Arc<Dag>) -> Self {
        let states = dag
            .task_names()
            .map(|name| (name.to_string(), TaskState::pending()))
            .collect();

        Self {
            dag,
            states,
            completed: BTreeSet::new(),
            ready_queue: VecDeque::new(),
            dispatch_order: Vec::new(),
            cancelled: false,
        }
    }

    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.states.get(task).map(|s| s.status)
    }

    pub fn state_of(&self, task: &str) -> Option<&TaskState> {
        self.states.get(task)
    }

    pub fn completed(&self) -> &BTreeSet<TaskName> {
        &self.completed
    }

    /// Every task has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.completed.len() == self.states.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of tasks currently `Running`.
    pub fn in_flight(&self) -> usize {
        self.states
            .values()
            .filter(|s| s.status == TaskStatus::Running)
            .count()
    }

    /// Number of tasks waiting in the `Ready` queue.
    pub fn queued(&self) -> usize {
        self.ready_queue.len()
    }

    /// Tasks in the order they were dispatched.
    pub fn dispatch_order(&self) -> &[TaskName] {
        &self.dispatch_order
    }

    /// `Pending` tasks whose upstreams are all complete, ascending by name.
    pub fn frontier(&self) -> Vec<TaskName> {
        self.dag
            .ready_tasks(&self.completed)
            .into_iter()
            .filter(|name| self.status_of(name) == Some(TaskStatus::Pending))
            .map(str::to_string)
            .collect()
    }

    /// Move the current frontier from `Pending` to `Ready` and queue it.
    ///
    /// Returns the newly ready tasks in the order they will be dispatched.
    pub fn promote_ready(&mut self) -> Vec<TaskName> {
        if self.cancelled {
            return Vec::new();
        }

        let frontier = self.frontier();
        for name in frontier.iter() {
            if let Some(state) = self.states.get_mut(name) {
                debug!(task = %name, "dependencies satisfied; marking Ready");
                state.status = TaskStatus::Ready;
            }
            self.ready_queue.push_back(name.clone());
        }
        frontier
    }

    /// Take the next `Ready` task and mark it `Running`.
    pub fn dispatch_next(&mut self) -> Option<TaskName> {
        if self.cancelled {
            return None;
        }

        while let Some(name) = self.ready_queue.pop_front() {
            let Some(state) = self.states.get_mut(&name) else {
                continue;
            };
            if state.status != TaskStatus::Ready {
                // Skipped while queued.
                continue;
            }
            state.status = TaskStatus::Running;
            info!(task = %name, "dispatching task");
            self.dispatch_order.push(name.clone());
            return Some(name);
        }
        None
    }

    /// Record a failed attempt of a running task that is about to be retried.
    pub fn record_attempt(&mut self, task: &str, attempt: u32, error: &TaskError) {
        match self.states.get_mut(task) {
            Some(state) if state.status == TaskStatus::Running => {
                state.attempts = attempt;
                state.last_error = Some(error.clone());
            }
            Some(state) => warn!(
                task = %task,
                status = %state.status,
                "attempt reported for task that is not running; ignoring"
            ),
            None => warn!(task = %task, "attempt reported for unknown task; ignoring"),
        }
    }

    /// Record the terminal result of a running task.
    ///
    /// On success, newly eligible tasks are promoted to `Ready`. On failure,
    /// every not-yet-started transitive dependent is marked `Skipped`.
    pub fn complete(
        &mut self,
        task: &str,
        attempts: u32,
        result: Result<(), TaskError>,
        elapsed: Duration,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(state) = self.states.get_mut(task) else {
            warn!(task = %task, "completion for unknown task; ignoring");
            return step;
        };
        if state.status != TaskStatus::Running {
            warn!(
                task = %task,
                status = %state.status,
                "completion for task that is not running; ignoring"
            );
            return step;
        }

        state.attempts = attempts;
        state.elapsed = Some(elapsed);

        match result {
            Ok(()) => {
                state.status = TaskStatus::Succeeded;
                info!(task = %task, attempts, ?elapsed, "task succeeded");
                self.completed.insert(task.to_string());
                step.newly_ready = self.promote_ready();
            }
            Err(err) => {
                warn!(
                    task = %task,
                    attempts,
                    error = %err,
                    "task failed; skipping dependents"
                );
                state.status = TaskStatus::Failed;
                state.last_error = Some(err);
                self.completed.insert(task.to_string());
                step.newly_failed.push(task.to_string());
                step.newly_skipped = self.skip_dependents_of(task);
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// Stop handing out work and skip every task that has not started.
    ///
    /// Running tasks are left alone; they finish (or time out) normally.
    pub fn cancel_pending(&mut self) -> SchedulerStep {
        self.cancelled = true;
        self.ready_queue.clear();

        let mut step = SchedulerStep::default();
        for (name, state) in self.states.iter_mut() {
            if matches!(state.status, TaskStatus::Pending | TaskStatus::Ready) {
                state.status = TaskStatus::Skipped;
                state.skip_reason = Some(SkipReason::Cancelled);
                state.last_error = Some(TaskError::cancelled(
                    "run cancelled before task started",
                ));
                self.completed.insert(name.clone());
                step.newly_skipped.push(name.clone());
            }
        }

        info!(skipped = step.newly_skipped.len(), "run cancelled; un-started tasks skipped");
        step.run_just_finished = self.is_finished();
        step
    }

    /// Overall outcome so far: `Failed` beats `Cancelled` beats `Succeeded`.
    pub fn outcome(&self) -> RunOutcome {
        if self.states.values().any(|s| s.status == TaskStatus::Failed) {
            RunOutcome::Failed
        } else if self
            .states
            .values()
            .any(|s| s.skip_reason == Some(SkipReason::Cancelled))
        {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Succeeded
        }
    }

    /// Consume the scheduler and produce the run report.
    ///
    /// Task entries follow the DAG's topological order.
    pub fn into_report(self, logical_date: DateTime<Utc>) -> RunReport {
        let outcome = self.outcome();
        let mut tasks = Vec::with_capacity(self.states.len());

        for name in self.dag.topological_order() {
            let (Some(spec), Some(state)) = (self.dag.task(name), self.states.get(name)) else {
                continue;
            };
            tasks.push(TaskReport {
                name: name.clone(),
                kind: spec.kind(),
                status: state.status,
                attempts: state.attempts,
                last_error: state.last_error.clone(),
                skip_reason: state.skip_reason.clone(),
                elapsed: state.elapsed,
            });
        }

        RunReport::new(logical_date, outcome, tasks, self.dispatch_order)
    }

    fn skip_dependents_of(&mut self, failed: &str) -> Vec<TaskName> {
        let mut skipped = Vec::new();

        for name in self.dag.transitive_dependents(failed) {
            if let Some(state) = self.states.get_mut(&name) {
                match state.status {
                    TaskStatus::Pending | TaskStatus::Ready => {
                        debug!(
                            task = %name,
                            upstream = %failed,
                            "marking dependent Skipped due to upstream failure"
                        );
                        state.status = TaskStatus::Skipped;
                        state.skip_reason = Some(SkipReason::UpstreamFailed(failed.to_string()));
                        self.completed.insert(name.clone());
                        skipped.push(name);
                    }
                    TaskStatus::Running => {
                        // Unreachable while upstreams must succeed before dispatch.
                        warn!(task = %name, upstream = %failed, "dependent of failed task is running");
                    }
                    TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped => {}
                }
            }
        }

        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskSpec;

    fn chain_with_branch() -> Arc<Dag> {
        // start -> a -> c ; start -> b
        let tasks = ["start", "a", "b", "c"]
            .iter()
            .map(|n| TaskSpec::barrier(*n))
            .collect();
        let edges = [("start", "a"), ("start", "b"), ("a", "c")]
            .iter()
            .map(|(x, y)| (x.to_string(), y.to_string()))
            .collect();
        Arc::new(Dag::build(tasks, edges).unwrap())
    }

    fn run_one(s: &mut Scheduler, expected: &str, result: Result<(), TaskError>) -> SchedulerStep {
        let name = s.dispatch_next().expect("a task should be ready");
        assert_eq!(name, expected);
        s.complete(&name, 1, result, Duration::ZERO)
    }

    #[test]
    fn walks_frontiers_in_name_order() {
        let mut s = Scheduler::new(chain_with_branch());
        assert_eq!(s.promote_ready(), vec!["start"]);
        assert_eq!(s.status_of("start"), Some(TaskStatus::Ready));

        let step = run_one(&mut s, "start", Ok(()));
        assert_eq!(step.newly_ready, vec!["a", "b"]);

        run_one(&mut s, "a", Ok(()));
        run_one(&mut s, "b", Ok(()));
        let step = run_one(&mut s, "c", Ok(()));
        assert!(step.run_just_finished);
        assert_eq!(s.outcome(), RunOutcome::Succeeded);
        assert_eq!(s.dispatch_order(), &["start", "a", "b", "c"]);
    }

    #[test]
    fn failure_skips_transitive_dependents_only() {
        let mut s = Scheduler::new(chain_with_branch());
        s.promote_ready();
        run_one(&mut s, "start", Ok(()));

        let step = run_one(&mut s, "a", Err(TaskError::load("boom")));
        assert_eq!(step.newly_failed, vec!["a"]);
        assert_eq!(step.newly_skipped, vec!["c"]);
        assert_eq!(
            s.state_of("c").unwrap().skip_reason,
            Some(SkipReason::UpstreamFailed("a".into()))
        );

        let step = run_one(&mut s, "b", Ok(()));
        assert!(step.run_just_finished);
        assert_eq!(s.dispatch_next(), None);
        assert_eq!(s.outcome(), RunOutcome::Failed);
    }

    #[test]
    fn cancel_skips_unstarted_and_lets_running_finish() {
        let mut s = Scheduler::new(chain_with_branch());
        s.promote_ready();
        run_one(&mut s, "start", Ok(()));
        assert_eq!(s.dispatch_next().as_deref(), Some("a"));

        let step = s.cancel_pending();
        assert_eq!(step.newly_skipped, vec!["b", "c"]);
        assert!(!step.run_just_finished);
        assert_eq!(s.dispatch_next(), None);

        let step = s.complete("a", 1, Ok(()), Duration::ZERO);
        assert!(step.newly_ready.is_empty());
        assert!(step.run_just_finished);
        assert_eq!(s.outcome(), RunOutcome::Cancelled);
        assert_eq!(
            s.state_of("b").unwrap().last_error.as_ref().map(|e| e.kind),
            Some(crate::errors::TaskErrorKind::Cancelled)
        );
    }

    #[test]
    fn completion_for_task_not_running_is_ignored() {
        let mut s = Scheduler::new(chain_with_branch());
        let step = s.complete("a", 1, Ok(()), Duration::ZERO);
        assert_eq!(step, SchedulerStep::default());
        assert_eq!(s.status_of("a"), Some(TaskStatus::Pending));
    }
}
