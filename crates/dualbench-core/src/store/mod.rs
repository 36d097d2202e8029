//! Backend collaborator contract.
//!
//! A [`Connector`] hands out live connections to the system under test. The
//! benchmark core never manages connection lifecycle beyond connect, ping and
//! drop: cooperative backends use [`AsyncConnection`]s that suspend at each
//! I/O call, pooled-thread backends use [`BlockingConnection`]s owned by one
//! worker thread each.

pub mod fixture;
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::future::Future;

use crate::catalog::OperationSpec;
use crate::error::StoreError;

pub use fixture::FixtureSpec;
pub use memory::{MemoryConfig, MemoryConnector};

#[cfg(feature = "postgres")]
pub use postgres::PgConnector;

/// Connection driven on a cooperative scheduler.
pub trait AsyncConnection: Send + 'static {
    /// Execute one operation, returning the number of rows touched.
    fn execute(
        &mut self,
        op: &OperationSpec,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Cheap round trip to check the connection is still usable.
    fn ping(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Connection that blocks its owning thread for each I/O call.
pub trait BlockingConnection: Send + 'static {
    /// Execute one operation, returning the number of rows touched.
    fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError>;

    /// Cheap round trip to check the connection is still usable.
    fn ping(&mut self) -> Result<(), StoreError>;
}

/// Source of connections to one backing store.
pub trait Connector: Send + Sync + 'static {
    type Async: AsyncConnection;
    type Blocking: BlockingConnection;

    /// Short name recorded in report metadata.
    fn name(&self) -> &str;

    /// Open a connection for the cooperative backend.
    fn connect_async(&self) -> impl Future<Output = Result<Self::Async, StoreError>> + Send;

    /// Open a connection for a pooled-thread worker.
    fn connect_blocking(&self) -> Result<Self::Blocking, StoreError>;

    /// Restore the fixture tables to their seeded state.
    ///
    /// Must be called outside of any async runtime.
    fn reset_fixture(&self) -> Result<(), StoreError>;
}
