use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loaddag::errors::WarehouseError;
use loaddag::types::BoxFuture;
use loaddag::warehouse::{ScalarValue, WarehouseClient, WarehousePool};

/// A scriptable in-memory warehouse.
///
/// - records every statement and query it receives, in arrival order, and
///   again once the call returns
/// - fails statements containing a configured substring, a fixed number of
///   times or forever
/// - answers `query_scalar` from scripted values (default: `Int(0)`)
/// - can add latency and tracks how many calls were in flight at once
///
/// Clones share state, so the same instance can back every connection of a
/// [`WarehousePool`] while the test keeps a handle for assertions.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[derive(Default)]
struct State {
    statements: Vec<String>,
    finished: Vec<String>,
    failures: Vec<FailureRule>,
    scalars: Vec<(String, Option<ScalarValue>)>,
    latency: Duration,
}

struct FailureRule {
    needle: String,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls whose SQL contains `needle`.
    pub fn failing(self, needle: &str, times: u32) -> Self {
        self.lock().failures.push(FailureRule {
            needle: needle.to_string(),
            remaining: Some(times),
        });
        self
    }

    /// Fail every call whose SQL contains `needle`.
    pub fn always_failing(self, needle: &str) -> Self {
        self.lock().failures.push(FailureRule {
            needle: needle.to_string(),
            remaining: None,
        });
        self
    }

    /// Answer queries containing `needle` with `value`.
    pub fn with_scalar(self, needle: &str, value: impl Into<ScalarValue>) -> Self {
        self.lock()
            .scalars
            .push((needle.to_string(), Some(value.into())));
        self
    }

    /// Answer queries containing `needle` with an empty result set.
    pub fn with_no_rows(self, needle: &str) -> Self {
        self.lock().scalars.push((needle.to_string(), None));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Pool of `size` connections all backed by this fake.
    pub fn pool(&self, size: usize) -> WarehousePool {
        let fake = self.clone();
        WarehousePool::with_factory(size, move || -> Box<dyn WarehouseClient> {
            Box::new(fake.clone())
        })
    }

    /// Every statement and query received so far.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Statements whose call returned (successfully or not), in completion
    /// order.
    pub fn finished_statements(&self) -> Vec<String> {
        self.lock().finished.clone()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .filter(|s| s.contains(needle))
            .cloned()
            .collect()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    /// Record `sql`, apply latency, and return the injected failure if any.
    async fn call(&self, sql: &str) -> Result<(), WarehouseError> {
        let _active = ActiveGuard::enter(&self.inner);

        let latency = {
            let mut state = self.lock();
            state.statements.push(sql.to_string());
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.finished.push(sql.to_string());
        let rule = state.failures.iter_mut().find(|r| {
            sql.contains(&r.needle) && r.remaining.is_none_or(|left| left > 0)
        });
        match rule {
            Some(rule) => {
                if let Some(left) = rule.remaining.as_mut() {
                    *left -= 1;
                }
                Err(WarehouseError::Statement(format!(
                    "injected failure for '{}'",
                    rule.needle
                )))
            }
            None => Ok(()),
        }
    }
}

impl WarehouseClient for FakeWarehouse {
    fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>> {
        Box::pin(self.call(statement))
    }

    fn query_scalar<'a>(
        &'a self,
        statement: &'a str,
    ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>> {
        Box::pin(async move {
            self.call(statement).await?;
            let state = self.lock();
            let scripted = state
                .scalars
                .iter()
                .find(|(needle, _)| statement.contains(needle.as_str()))
                .map(|(_, value)| value.clone());
            Ok(scripted.unwrap_or(Some(ScalarValue::Int(0))))
        })
    }
}

struct ActiveGuard<'a> {
    inner: &'a Inner,
}

impl<'a> ActiveGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active.fetch_max(now, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
