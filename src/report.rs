// src/report.rs

//! Run report: what happened to every task in one run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::dag::{FailedCheck, SkipReason, TaskKind, TaskName};
use crate::errors::{TaskError, TaskErrorKind};
use crate::types::{RunOutcome, TaskStatus};

/// Final state of a single task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub name: TaskName,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<TaskError>,
    pub skip_reason: Option<SkipReason>,
    pub elapsed: Option<Duration>,
}

/// Immutable result of one DAG run. Always produced, even when the run fails.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub logical_date: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Per-task results in topological order.
    pub tasks: Vec<TaskReport>,
    /// Failing quality predicates of failed quality-gate tasks.
    pub failed_checks: Vec<FailedCheck>,
    /// Order in which tasks were dispatched.
    pub dispatch_order: Vec<TaskName>,
}

impl RunReport {
    pub fn new(
        logical_date: DateTime<Utc>,
        outcome: RunOutcome,
        tasks: Vec<TaskReport>,
        dispatch_order: Vec<TaskName>,
    ) -> Self {
        let failed_checks = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .filter_map(|t| t.last_error.as_ref())
            .filter(|e| e.kind == TaskErrorKind::DataQuality)
            .flat_map(|e| e.failed_checks.iter().cloned())
            .collect();

        Self {
            logical_date,
            outcome,
            tasks,
            failed_checks,
            dispatch_order,
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn status_of(&self, name: &str) -> Option<TaskStatus> {
        self.task(name).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run for {} {} ({} succeeded, {} failed, {} skipped)",
            self.logical_date.format("%Y-%m-%d"),
            self.outcome,
            self.count(TaskStatus::Succeeded),
            self.count(TaskStatus::Failed),
            self.count(TaskStatus::Skipped),
        )?;

        for t in self.tasks.iter() {
            write!(f, "  {:<32} {:<10} {:<9}", t.name, t.kind, t.status)?;
            if t.attempts > 0 {
                write!(f, " attempts={}", t.attempts)?;
            }
            match (&t.skip_reason, &t.last_error) {
                (Some(SkipReason::UpstreamFailed(up)), _) => write!(f, " (upstream '{up}' failed)")?,
                (Some(SkipReason::Cancelled), _) => write!(f, " (cancelled)")?,
                (None, Some(err)) if t.status == TaskStatus::Failed => write!(f, " {err}")?,
                _ => {}
            }
            writeln!(f)?;
        }

        if !self.failed_checks.is_empty() {
            writeln!(f, "failed quality checks:")?;
            for check in self.failed_checks.iter() {
                writeln!(f, "  - {check}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{Observation, QualityCheck};
    use crate::warehouse::ScalarValue;

    fn entry(name: &str, status: TaskStatus, err: Option<TaskError>) -> TaskReport {
        TaskReport {
            name: name.into(),
            kind: TaskKind::QualityCheck,
            status,
            attempts: 1,
            last_error: err,
            skip_reason: None,
            elapsed: None,
        }
    }

    #[test]
    fn failed_checks_are_collected_from_failed_quality_tasks() {
        let failing = FailedCheck {
            check: QualityCheck::equals("SELECT COUNT(*) FROM users WHERE userid IS NULL", 0),
            observed: Observation::Value(ScalarValue::Int(3)),
        };
        let report = RunReport::new(
            Utc::now(),
            RunOutcome::Failed,
            vec![
                entry("ok", TaskStatus::Succeeded, None),
                entry(
                    "gate",
                    TaskStatus::Failed,
                    Some(TaskError::data_quality(vec![failing.clone()])),
                ),
            ],
            vec!["ok".into(), "gate".into()],
        );

        assert_eq!(report.failed_checks, vec![failing]);
        assert_eq!(report.count(TaskStatus::Failed), 1);
        let rendered = report.to_string();
        assert!(rendered.contains("failed quality checks:"));
        assert!(rendered.contains("observed 3"));
    }
}
