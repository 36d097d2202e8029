//! Pooled-thread backend.
//!
//! A fixed set of OS worker threads, each owning one blocking connection for
//! its lifetime. A caller first waits for a free worker, then hands the job
//! over a shared queue. The worker holds the caller's slot until the
//! blocking call returns, so a caller that gave up on a slow operation does
//! not free the worker early.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use crate::catalog::OperationSpec;
use crate::error::StoreError;
use crate::store::{BlockingConnection, Connector};

use super::Attempt;

struct Job {
    op: OperationSpec,
    slot: OwnedSemaphorePermit,
    reply: oneshot::Sender<Attempt>,
}

/// Fixed worker pool, owned by one run.
pub struct PooledBackend {
    jobs: Option<Sender<Job>>,
    free: Arc<Semaphore>,
    workers: Vec<JoinHandle<()>>,
    op_timeout: Duration,
}

impl PooledBackend {
    /// Spawn `workers` threads and wait until each has connected.
    pub async fn start<C: Connector>(
        connector: Arc<C>,
        workers: usize,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let worker_count = workers.max(1);
        let (jobs_tx, jobs_rx) = channel::unbounded::<Job>();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();

        let mut backend = Self {
            jobs: Some(jobs_tx),
            free: Arc::new(Semaphore::new(worker_count)),
            workers: Vec::with_capacity(worker_count),
            op_timeout,
        };

        let mut failure = None;
        for id in 0..worker_count {
            let connector = connector.clone();
            let jobs = jobs_rx.clone();
            let ready = ready_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("dualbench-worker-{}", id))
                .spawn(move || worker_loop(id, connector, jobs, ready));
            match spawned {
                Ok(handle) => backend.workers.push(handle),
                Err(e) => {
                    failure = Some(StoreError::Connect(format!("failed to spawn worker: {}", e)));
                    break;
                }
            }
        }
        drop(ready_tx);

        for _ in 0..backend.workers.len() {
            match ready_rx.recv().await {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    failure.get_or_insert(err);
                }
                None => break,
            }
        }

        if let Some(err) = failure {
            backend.shutdown().await;
            return Err(err);
        }
        tracing::debug!(workers = worker_count, store = connector.name(), "worker pool ready");
        Ok(backend)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub(crate) async fn execute_once(&self, op: &OperationSpec) -> Attempt {
        let closed = || StoreError::Connect("worker pool closed".to_string());

        let slot = match self.free.clone().acquire_owned().await {
            Ok(slot) => slot,
            Err(_) => return Attempt::failed(Duration::ZERO, closed()),
        };
        let Some(jobs) = &self.jobs else {
            return Attempt::failed(Duration::ZERO, closed());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = Instant::now();
        let job = Job {
            op: op.clone(),
            slot,
            reply: reply_tx,
        };
        if jobs.send(job).is_err() {
            return Attempt::failed(Duration::ZERO, closed());
        }

        match tokio::time::timeout(self.op_timeout, reply_rx).await {
            Ok(Ok(attempt)) => attempt,
            Ok(Err(_)) => Attempt::failed(
                sent.elapsed(),
                StoreError::ConnectionReset("worker exited".to_string()),
            ),
            Err(_) => Attempt::failed(sent.elapsed(), StoreError::Timeout),
        }
    }

    /// Stop accepting jobs and join the workers once they drain.
    pub(crate) async fn shutdown(mut self) {
        self.free.close();
        self.jobs = None;
        let workers = std::mem::take(&mut self.workers);
        let count = workers.len();
        let joined = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_ok)
                .count()
        })
        .await
        .unwrap_or(0);
        if joined < count {
            tracing::warn!(joined, count, "some workers panicked");
        }
        tracing::debug!(workers = joined, "worker pool stopped");
    }
}

fn worker_loop<C: Connector>(
    id: usize,
    connector: Arc<C>,
    jobs: Receiver<Job>,
    ready: mpsc::UnboundedSender<Result<(), StoreError>>,
) {
    let opened = connector.connect_blocking().and_then(|mut conn| {
        conn.ping()?;
        Ok(conn)
    });
    let mut conn = match opened {
        Ok(conn) => {
            let _ = ready.send(Ok(()));
            Some(conn)
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    drop(ready);

    while let Ok(Job { op, slot, reply }) = jobs.recv() {
        let started = Instant::now();
        let result = ensure_connection(connector.as_ref(), &mut conn).and_then(|c| c.execute(&op));
        let latency = started.elapsed();

        if matches!(&result, Err(err) if err.is_transient()) {
            conn = match connector.connect_blocking() {
                Ok(fresh) => Some(fresh),
                Err(err) => {
                    tracing::warn!(worker = id, error = %err, "reconnect failed");
                    None
                }
            };
        }

        let _ = reply.send(Attempt { latency, result });
        drop(slot);
    }
}

fn ensure_connection<'a, C: Connector>(
    connector: &C,
    conn: &'a mut Option<C::Blocking>,
) -> Result<&'a mut C::Blocking, StoreError> {
    if conn.is_none() {
        *conn = Some(connector.connect_blocking()?);
    }
    conn.as_mut()
        .ok_or_else(|| StoreError::Connect("no connection available".to_string()))
}
