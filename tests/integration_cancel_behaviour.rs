// tests/integration_cancel_behaviour.rs

use loaddag_test_utils::builders::{pipeline_dag, run_config, wide_dag};
use loaddag_test_utils::{FakeWarehouse, init_tracing, with_timeout};

use std::error::Error;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use loaddag::dag::SkipReason;
use loaddag::engine::{RetryPolicy, Runtime};
use loaddag::errors::TaskErrorKind;
use loaddag::types::{RunOutcome, TaskStatus};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn cancel_mid_run_lets_in_flight_tasks_finish() -> TestResult {
    init_tracing();

    let warehouse = FakeWarehouse::new().with_latency(Duration::from_millis(100));
    let runtime = Runtime::new(pipeline_dag(), run_config(), warehouse.pool(4));
    let cancel = runtime.cancellation_token();

    tokio::spawn(async move {
        // Both staging tasks are mid-statement by now.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = with_timeout(runtime.run()).await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.status_of("start"), Some(TaskStatus::Succeeded));
    assert_eq!(report.status_of("stage_a"), Some(TaskStatus::Succeeded));
    assert_eq!(report.status_of("stage_b"), Some(TaskStatus::Succeeded));

    for name in ["fact", "dim_x", "dim_y", "quality", "end"] {
        let task = report.task(name).ok_or("missing task")?;
        assert_eq!(task.status, TaskStatus::Skipped, "task {name}");
        assert_eq!(task.skip_reason, Some(SkipReason::Cancelled));
        assert_eq!(
            task.last_error.as_ref().map(|e| e.kind),
            Some(TaskErrorKind::Cancelled)
        );
    }

    assert!(warehouse.statements_matching("INSERT INTO").is_empty());
    assert_eq!(warehouse.statements_matching("COPY").len(), 2);

    Ok(())
}

#[tokio::test]
async fn cancel_before_start_runs_nothing() -> TestResult {
    init_tracing();

    let token = CancellationToken::new();
    token.cancel();

    let warehouse = FakeWarehouse::new();
    let report = with_timeout(
        Runtime::new(pipeline_dag(), run_config(), warehouse.pool(2))
            .with_cancellation(token)
            .run(),
    )
    .await;

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.count(TaskStatus::Skipped), report.tasks.len());
    assert!(report.dispatch_order.is_empty());
    assert!(warehouse.statements().is_empty());

    Ok(())
}

#[tokio::test]
async fn cancel_during_backoff_stops_retrying() -> TestResult {
    init_tracing();

    let config = run_config().with_retry(RetryPolicy::fixed(5, Duration::from_secs(60)));
    let warehouse = FakeWarehouse::new().always_failing("INSERT INTO table_00");
    let runtime = Runtime::new(wide_dag(1), config, warehouse.pool(1));
    let cancel = runtime.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = with_timeout(runtime.run()).await;

    let task = report.task("dim_00").ok_or("missing dim_00")?;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.last_error.as_ref().map(|e| e.kind), Some(TaskErrorKind::Load));
    // A failure takes precedence over the cancellation.
    assert_eq!(report.outcome, RunOutcome::Failed);

    Ok(())
}
