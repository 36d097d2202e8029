//! Backend adapters.
//!
//! Two execution strategies behind one capability: the cooperative adapter
//! interleaves operations on the run's single-threaded scheduler, the pooled
//! adapter hands each operation to a dedicated blocking worker thread. The
//! simulator only sees [`BackendHandle::execute`].

mod cooperative;
mod pooled;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::OperationSpec;
use crate::error::{ErrorKind, FailureClass, ParseError, StoreError};
use crate::store::Connector;

pub use cooperative::CooperativeBackend;
pub use pooled::PooledBackend;

/// Default connection pool capacity for the cooperative backend.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Default worker count for the pooled-thread backend.
pub const DEFAULT_WORKERS: usize = 5;

/// Default per-operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries granted to a transient failure.
pub const TRANSIENT_RETRIES: u32 = 1;

/// Execution strategy under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendVariant {
    /// Single-threaded cooperative scheduler with a bounded connection pool.
    Cooperative,
    /// Fixed pool of blocking worker threads.
    Pooled,
}

impl BackendVariant {
    pub const ALL: [BackendVariant; 2] = [BackendVariant::Cooperative, BackendVariant::Pooled];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendVariant::Cooperative => "cooperative",
            BackendVariant::Pooled => "pooled",
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendVariant {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cooperative" => Ok(BackendVariant::Cooperative),
            "pooled" => Ok(BackendVariant::Pooled),
            other => Err(ParseError::Unknown {
                what: "backend",
                value: other.to_string(),
            }),
        }
    }
}

/// Sizing and timeout options shared by both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// Cooperative connection pool capacity.
    pub pool_size: usize,
    /// Pooled-thread worker count.
    pub workers: usize,
    /// Per-operation timeout.
    pub op_timeout: Duration,
}

impl BackendOptions {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            workers: DEFAULT_WORKERS,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Classified failure of an executed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StoreError> for OperationFailure {
    fn from(err: &StoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of executing one operation, retries included.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub success: bool,
    /// Execution time across all attempts, excluding waits for a free
    /// connection or worker.
    pub latency: Duration,
    pub attempts: u32,
    pub failure: Option<OperationFailure>,
}

impl OperationOutcome {
    pub fn succeeded(latency: Duration, attempts: u32) -> Self {
        Self {
            success: true,
            latency,
            attempts,
            failure: None,
        }
    }

    pub fn failed(latency: Duration, attempts: u32, failure: OperationFailure) -> Self {
        Self {
            success: false,
            latency,
            attempts,
            failure: Some(failure),
        }
    }

    /// Failure class, if the operation failed.
    pub fn failure_class(&self) -> Option<FailureClass> {
        self.failure.as_ref().map(|f| f.kind.class())
    }

    pub fn is_fatal(&self) -> bool {
        self.failure_class() == Some(FailureClass::Fatal)
    }
}

/// One attempt at executing an operation.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub latency: Duration,
    pub result: Result<u64, StoreError>,
}

impl Attempt {
    pub(crate) fn failed(latency: Duration, err: StoreError) -> Self {
        Self {
            latency,
            result: Err(err),
        }
    }
}

/// A started backend, owned by one run.
pub enum BackendHandle<C: Connector> {
    Cooperative(CooperativeBackend<C>),
    Pooled(PooledBackend),
}

impl<C: Connector> BackendHandle<C> {
    /// Acquire the backend's connections.
    ///
    /// Cooperative backends open and ping `pool_size` connections; pooled
    /// backends start `workers` threads, each opening its own connection.
    pub async fn start(
        variant: BackendVariant,
        connector: Arc<C>,
        options: BackendOptions,
    ) -> Result<Self, StoreError> {
        match variant {
            BackendVariant::Cooperative => Ok(BackendHandle::Cooperative(
                CooperativeBackend::start(connector, options.pool_size, options.op_timeout)
                    .await?,
            )),
            BackendVariant::Pooled => Ok(BackendHandle::Pooled(
                PooledBackend::start(connector, options.workers, options.op_timeout).await?,
            )),
        }
    }

    pub fn variant(&self) -> BackendVariant {
        match self {
            BackendHandle::Cooperative(_) => BackendVariant::Cooperative,
            BackendHandle::Pooled(_) => BackendVariant::Pooled,
        }
    }

    /// Execute one operation. Transient failures are retried once; fatal
    /// failures surface immediately.
    pub async fn execute(&self, op: &OperationSpec) -> OperationOutcome {
        let mut latency = Duration::ZERO;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let attempt = match self {
                BackendHandle::Cooperative(backend) => backend.execute_once(op).await,
                BackendHandle::Pooled(backend) => backend.execute_once(op).await,
            };
            latency += attempt.latency;

            match attempt.result {
                Ok(_) => return OperationOutcome::succeeded(latency, attempts),
                Err(err) if err.is_transient() && attempts <= TRANSIENT_RETRIES => {
                    tracing::debug!(
                        backend = %self.variant(),
                        kind = %op.kind,
                        error = %err,
                        "retrying transient failure"
                    );
                }
                Err(err) => {
                    return OperationOutcome::failed(latency, attempts, OperationFailure::from(&err))
                }
            }
        }
    }

    /// Release connections and stop workers.
    pub async fn shutdown(self) {
        match self {
            BackendHandle::Cooperative(backend) => backend.shutdown(),
            BackendHandle::Pooled(backend) => backend.shutdown().await,
        }
    }
}
