//! Cooperative backend.
//!
//! Operations interleave on the run's current-thread runtime. A semaphore
//! caps how many may hold a connection at once; excess requests queue on
//! it. Suspension happens at connection acquisition and at each store call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::catalog::OperationSpec;
use crate::error::StoreError;
use crate::store::{AsyncConnection, Connector};

use super::Attempt;

/// Bounded pool of async connections, owned by one run.
pub struct CooperativeBackend<C: Connector> {
    connector: Arc<C>,
    idle: Mutex<Vec<C::Async>>,
    slots: Semaphore,
    capacity: usize,
    op_timeout: Duration,
}

impl<C: Connector> CooperativeBackend<C> {
    /// Open and health-check `capacity` connections.
    pub async fn start(
        connector: Arc<C>,
        capacity: usize,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let capacity = capacity.max(1);
        let mut connections = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            let mut conn = connector.connect_async().await?;
            conn.ping().await?;
            connections.push(conn);
        }
        tracing::debug!(capacity, store = connector.name(), "cooperative pool ready");

        Ok(Self {
            connector,
            idle: Mutex::new(connections),
            slots: Semaphore::new(capacity),
            capacity,
            op_timeout,
        })
    }

    /// Pool capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections currently idle in the pool.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Take a connection, opening a replacement if a previous one was
    /// discarded. The caller must already hold a slot.
    pub async fn acquire(&self) -> Result<C::Async, StoreError> {
        let pooled = self.idle.lock().pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => self.connector.connect_async().await,
        }
    }

    /// Return a connection. Unhealthy connections are dropped.
    pub fn release(&self, conn: C::Async, healthy: bool) {
        if healthy {
            self.idle.lock().push(conn);
        }
    }

    pub(crate) async fn execute_once(&self, op: &OperationSpec) -> Attempt {
        let _slot = match self.slots.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Attempt::failed(
                    Duration::ZERO,
                    StoreError::Connect("connection pool closed".to_string()),
                )
            }
        };
        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(err) => return Attempt::failed(Duration::ZERO, err),
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.op_timeout, conn.execute(op)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };
        let latency = started.elapsed();

        let healthy = !matches!(&result, Err(err) if err.is_transient());
        self.release(conn, healthy);

        Attempt { latency, result }
    }

    pub(crate) fn shutdown(self) {
        self.slots.close();
        let closed = self.idle.lock().drain(..).count();
        tracing::debug!(closed, "cooperative pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Table;
    use crate::store::{FixtureSpec, MemoryConfig, MemoryConnector};

    fn connector(latency: Duration) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector::new(
            MemoryConfig::new(FixtureSpec::new(10, 10)).with_io_latency(latency),
        ))
    }

    #[tokio::test]
    async fn test_start_opens_capacity() {
        let store = connector(Duration::ZERO);
        let backend = CooperativeBackend::start(store.clone(), 3, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(backend.capacity(), 3);
        assert_eq!(backend.idle_connections(), 3);
        assert_eq!(store.connections_opened(), 3);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_replaced_lazily() {
        let store = connector(Duration::ZERO);
        let backend = CooperativeBackend::start(store.clone(), 1, Duration::from_secs(1))
            .await
            .unwrap();
        store.inject_fault(1, StoreError::ConnectionReset("injected".into()));

        let attempt = backend.execute_once(&OperationSpec::read(Table::Users, 1)).await;
        assert!(attempt.result.is_err());
        assert_eq!(backend.idle_connections(), 0);

        let attempt = backend.execute_once(&OperationSpec::read(Table::Users, 1)).await;
        assert_eq!(attempt.result.unwrap(), 1);
        assert_eq!(backend.idle_connections(), 1);
        assert_eq!(store.connections_opened(), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_timeout_recorded() {
        let store = connector(Duration::from_secs(10));
        let backend = CooperativeBackend::start(store, 1, Duration::from_millis(50))
            .await
            .unwrap();

        let attempt = backend.execute_once(&OperationSpec::read(Table::Users, 1)).await;
        assert_eq!(attempt.result, Err(StoreError::Timeout));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_pool_bounds_in_flight_operations() {
        let store = connector(Duration::from_millis(100));
        let backend = CooperativeBackend::start(store, 2, Duration::from_secs(5))
            .await
            .unwrap();
        let op = OperationSpec::read(Table::Users, 1);

        let started = tokio::time::Instant::now();
        let attempts = futures::future::join_all((0..4).map(|_| backend.execute_once(&op))).await;
        assert!(attempts.iter().all(|a| a.result.is_ok()));
        // Four operations through two slots take two round trips.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
