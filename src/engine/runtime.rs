// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::dag::{Dag, Scheduler, TaskSpec};
use crate::errors::TaskError;
use crate::exec::{Credentials, ExecutorRegistry, RunContext, TaskContext, TaskExecutor};
use crate::report::RunReport;
use crate::warehouse::WarehousePool;

use super::{RetryPolicy, RunConfig, RunEvent};

const EVENT_BUFFER: usize = 256;

/// Run `dag` to completion with the default executors.
pub async fn run_dag(dag: impl Into<Arc<Dag>>, config: RunConfig, pool: WarehousePool) -> RunReport {
    Runtime::new(dag, config, pool).run().await
}

/// Drives the [`Scheduler`] for one run.
///
/// The runtime is the only writer of scheduler state. Workers run task
/// attempts (including retries and backoff sleeps) and report back through an
/// mpsc channel; every state transition happens here, one event at a time.
pub struct Runtime {
    scheduler: Scheduler,
    config: RunConfig,
    pool: WarehousePool,
    registry: ExecutorRegistry,
    run: Arc<RunContext>,
    cancel: CancellationToken,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(dag: impl Into<Arc<Dag>>, config: RunConfig, pool: WarehousePool) -> Self {
        let run = Arc::new(RunContext::new(config.logical_date));
        Self {
            scheduler: Scheduler::new(dag.into()),
            config,
            pool,
            registry: ExecutorRegistry::default(),
            run,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.run = Arc::new(RunContext::new(self.config.logical_date).with_credentials(credentials));
        self
    }

    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Use an externally owned cancellation signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Main loop.
    ///
    /// - Dispatches `Ready` tasks while fewer than `max_concurrency` run.
    /// - Feeds worker events into the scheduler.
    /// - On cancellation, stops dispatching and lets in-flight tasks finish.
    pub async fn run(mut self) -> RunReport {
        let span = info_span!("run", logical_date = %self.config.logical_date.format("%Y-%m-%d"));
        async move {
            let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
            let mut workers = JoinSet::new();

            info!(
                tasks = self.scheduler.dag().len(),
                start = %self.scheduler.dag().start(),
                max_concurrency = self.config.max_concurrency,
                "run started"
            );
            self.scheduler.promote_ready();

            loop {
                if self.cancel.is_cancelled() && !self.scheduler.is_cancelled() {
                    self.scheduler.cancel_pending();
                }

                self.dispatch_ready(&mut workers, &tx);

                if self.scheduler.is_finished() {
                    break;
                }
                if self.scheduler.in_flight() == 0 {
                    error!(
                        unfinished = ?self.scheduler.frontier(),
                        "no task in flight but run is not finished; stopping"
                    );
                    break;
                }

                tokio::select! {
                    _ = self.cancel.cancelled(), if !self.scheduler.is_cancelled() => {
                        info!("cancellation requested");
                    }
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "worker task aborted");
                        }
                    }
                    event = rx.recv() => match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    },
                }
            }

            drop(tx);
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task aborted");
                }
            }

            let report = self.scheduler.into_report(self.config.logical_date);
            info!(outcome = %report.outcome, "run finished");
            report
        }
        .instrument(span)
        .await
    }

    fn handle_event(&mut self, event: RunEvent) {
        debug!(?event, "runtime received event");
        match event {
            RunEvent::AttemptFailed {
                task,
                attempt,
                error,
                retry_in,
            } => {
                debug!(task = %task, attempt, ?retry_in, "recording failed attempt");
                self.scheduler.record_attempt(&task, attempt, &error);
            }
            RunEvent::TaskFinished {
                task,
                attempts,
                result,
                elapsed,
            } => {
                let step = self.scheduler.complete(&task, attempts, result, elapsed);
                if !step.newly_skipped.is_empty() {
                    info!(task = %task, skipped = ?step.newly_skipped, "downstream tasks skipped");
                }
                if !step.newly_ready.is_empty() {
                    debug!(ready = ?step.newly_ready, "tasks became ready");
                }
            }
        }
    }

    fn dispatch_ready(&mut self, workers: &mut JoinSet<()>, tx: &mpsc::Sender<RunEvent>) {
        let limit = self.config.max_concurrency.max(1);

        while self.scheduler.in_flight() < limit {
            let Some(name) = self.scheduler.dispatch_next() else {
                break;
            };
            let Some(task) = self.scheduler.dag().task(&name).cloned() else {
                self.scheduler.complete(
                    &name,
                    0,
                    Err(TaskError::load(format!("task '{name}' is missing from the DAG"))),
                    Duration::ZERO,
                );
                continue;
            };

            let worker = Worker {
                executor: self.registry.get(task.kind()),
                policy: task.retry.unwrap_or(self.config.retry),
                task: Arc::new(task),
                timeout: self.config.task_timeout,
                run: Arc::clone(&self.run),
                pool: self.pool.clone(),
                cancel: self.cancel.clone(),
                tx: tx.clone(),
            };
            let span = info_span!("task", task = %name);
            workers.spawn(worker.run().instrument(span));
        }
    }
}

/// Everything one task needs to run all of its attempts off the main loop.
struct Worker {
    task: Arc<TaskSpec>,
    executor: Option<Arc<dyn TaskExecutor>>,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    run: Arc<RunContext>,
    pool: WarehousePool,
    cancel: CancellationToken,
    tx: mpsc::Sender<RunEvent>,
}

impl Worker {
    async fn run(self) {
        let started = Instant::now();
        let mut unreported = Unreported::new(&self.task, &self.tx);
        let (attempts, result) = self.attempt_until_done().await;

        let event = RunEvent::TaskFinished {
            task: self.task.name.clone(),
            attempts,
            result,
            elapsed: started.elapsed(),
        };
        if self.tx.send(event).await.is_err() {
            warn!("runtime gone before task completion could be reported");
        }
        unreported.disarm();
    }

    async fn attempt_until_done(&self) -> (u32, Result<(), TaskError>) {
        let Some(executor) = self.executor.clone() else {
            let kind = self.task.kind();
            error!(%kind, "no executor registered for task kind");
            return (
                1,
                Err(TaskError::for_kind(
                    kind,
                    format!("no executor registered for {kind} tasks"),
                )),
            );
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max_attempts = self.policy.max_attempts, "starting attempt");

            let err = match self.attempt(Arc::clone(&executor), attempt).await {
                Ok(()) => return (attempt, Ok(())),
                Err(err) => err,
            };

            if !err.is_retryable() || !self.policy.allows_retry_after(attempt) {
                return (attempt, Err(err));
            }
            if self.cancel.is_cancelled() {
                info!(attempt, "run cancelled; not retrying");
                return (attempt, Err(err));
            }

            let delay = self.policy.delay_after(attempt);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %err,
                ?delay,
                "attempt failed; retrying"
            );
            let event = RunEvent::AttemptFailed {
                task: self.task.name.clone(),
                attempt,
                error: err.clone(),
                retry_in: delay,
            };
            if self.tx.send(event).await.is_err() {
                return (attempt, Err(err));
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!(attempt, "run cancelled during backoff; not retrying");
                    return (attempt, Err(err));
                }
            }
        }
    }

    /// One attempt, isolated in its own task so that a panicking executor
    /// becomes a task error instead of taking the worker down.
    ///
    /// The timeout is handed to the executor as a budget that is checked
    /// between statements; the attempt future itself is never dropped.
    async fn attempt(
        &self,
        executor: Arc<dyn TaskExecutor>,
        attempt: u32,
    ) -> Result<(), TaskError> {
        let kind = self.task.kind();
        let task = Arc::clone(&self.task);
        let run = Arc::clone(&self.run);
        let pool = self.pool.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(
            async move {
                let ctx = TaskContext::new(&task, attempt, &run, &pool).with_timeout(timeout);
                executor.execute(&ctx).await
            }
            .in_current_span(),
        );

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(TaskError::for_kind(kind, format!("executor aborted: {e}"))),
        }
    }
}

/// Reports a task as failed if its worker goes away (aborted or panicked)
/// before sending `TaskFinished`, so the run loop never waits on it forever.
struct Unreported<'a> {
    task: &'a TaskSpec,
    tx: &'a mpsc::Sender<RunEvent>,
    armed: bool,
}

impl<'a> Unreported<'a> {
    fn new(task: &'a TaskSpec, tx: &'a mpsc::Sender<RunEvent>) -> Self {
        Self {
            task,
            tx,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Unreported<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let event = RunEvent::TaskFinished {
            task: self.task.name.clone(),
            attempts: 1,
            result: Err(TaskError::for_kind(
                self.task.kind(),
                "worker exited before reporting a result",
            )),
            elapsed: Duration::ZERO,
        };
        if self.tx.try_send(event).is_err() {
            error!(task = %self.task.name, "could not report aborted worker");
        }
    }
}
