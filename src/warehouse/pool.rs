// src/warehouse/pool.rs

//! Bounded pool of warehouse connections.
//!
//! Each executor attempt checks out its own connection, so two tasks never
//! share an in-flight statement. The connection goes back to the pool when the
//! [`PooledConnection`] guard is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::errors::WarehouseError;
use crate::warehouse::WarehouseClient;

type Connection = Box<dyn WarehouseClient>;

struct PoolInner {
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// Cheaply clonable handle to a set of warehouse connections.
#[derive(Clone)]
pub struct WarehousePool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WarehousePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehousePool")
            .field("size", &self.inner.size)
            .field("available", &self.inner.permits.available_permits())
            .finish()
    }
}

impl WarehousePool {
    /// Build a pool from already-opened connections.
    pub fn new(connections: Vec<Connection>) -> Self {
        let size = connections.len();
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(connections),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }),
        }
    }

    /// Build a pool of `size` connections using `factory`.
    pub fn with_factory<F>(size: usize, mut factory: F) -> Self
    where
        F: FnMut() -> Connection,
    {
        Self::new((0..size).map(|_| factory()).collect())
    }

    /// Pool holding exactly one connection.
    pub fn single(client: impl WarehouseClient + 'static) -> Self {
        Self::new(vec![Box::new(client)])
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Wait for a free connection.
    pub async fn checkout(&self) -> Result<PooledConnection, WarehouseError> {
        if self.inner.size == 0 {
            return Err(WarehouseError::Connection(
                "warehouse pool has no connections".to_string(),
            ));
        }

        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| WarehouseError::Connection("warehouse pool closed".to_string()))?;

        let conn = self
            .inner
            .idle
            .lock()
            .map_err(|_| WarehouseError::Connection("warehouse pool poisoned".to_string()))?
            .pop()
            .ok_or_else(|| {
                WarehouseError::Connection("no idle connection despite free permit".to_string())
            })?;

        debug!(
            available = self.inner.permits.available_permits(),
            "checked out warehouse connection"
        );

        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// A connection borrowed from a [`WarehousePool`].
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
    // Released after `drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = dyn WarehouseClient;

    fn deref(&self) -> &Self::Target {
        // Only `None` during drop.
        match self.conn.as_ref() {
            Some(conn) => conn.as_ref(),
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            match self.pool.idle.lock() {
                Ok(mut idle) => idle.push(conn),
                Err(_) => warn!("warehouse pool poisoned; dropping connection"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoxFuture;
    use crate::warehouse::ScalarValue;

    struct Noop;

    impl WarehouseClient for Noop {
        fn execute<'a>(&'a self, _statement: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>> {
            Box::pin(async { Ok(()) })
        }

        fn query_scalar<'a>(
            &'a self,
            _statement: &'a str,
        ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>> {
            Box::pin(async { Ok(None) })
        }
    }

    #[tokio::test]
    async fn checkout_blocks_until_connection_returned() {
        let pool = WarehousePool::single(Noop);
        let first = pool.checkout().await.unwrap();

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(20), pool.checkout()).await;
        assert!(waiting.is_err(), "second checkout should wait");

        drop(first);
        let second = pool.checkout().await.unwrap();
        second.execute("SELECT 1").await.unwrap();
    }

    #[tokio::test]
    async fn empty_pool_is_a_connection_error() {
        let pool = WarehousePool::new(Vec::new());
        assert!(matches!(
            pool.checkout().await,
            Err(WarehouseError::Connection(_))
        ));
    }
}
