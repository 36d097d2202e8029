//! Concurrency simulator.
//!
//! Each iteration of a run resets the fixture, then builds a dedicated
//! current-thread runtime that owns the backend for the iteration's
//! lifetime. Logical clients are futures joined on that runtime; every
//! client replays its own plan in order and keeps its own metrics, which are
//! merged once after all clients have finished.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{BackendHandle, BackendOptions, BackendVariant};
use crate::error::RunError;
use crate::metrics::{
    throughput, BucketCount, ClientMetrics, FailureRecord, LatencySummary, RunMetrics,
    ThroughputSpread,
};
use crate::store::Connector;
use crate::workload::{PlanPolicy, WorkloadGenerator, WorkloadKind, WorkloadPlan};

/// Default wall-clock budget for one iteration of a run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default fraction of planned operations allowed to fail fatally.
pub const DEFAULT_FATAL_THRESHOLD: f64 = 0.5;

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Warming,
    Running,
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Warming => "warming",
            RunPhase::Running => "running",
            RunPhase::Draining => "draining",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Why a run stopped dispatching before its plans were exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Fatal failures exceeded the configured fraction of planned operations.
    FatalThresholdExceeded,
    /// The run-level timeout elapsed.
    RunTimeout,
    /// The backend could not acquire its connections.
    WarmupFailed,
    /// The fixture could not be restored before an iteration.
    FixtureResetFailed,
    /// The iteration's runtime could not be built.
    RuntimeFailed,
}

/// Simulator settings shared by every run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    pub options: BackendOptions,
    /// Wall-clock budget per iteration.
    pub run_timeout: Duration,
    /// Runs fail once fatal failures exceed this fraction of planned
    /// operations.
    pub fatal_threshold: f64,
}

impl SimulatorConfig {
    /// Set the backend options.
    pub fn with_options(mut self, options: BackendOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the wall-clock budget per iteration.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the fraction of planned operations allowed to fail fatally.
    pub fn with_fatal_threshold(mut self, threshold: f64) -> Self {
        self.fatal_threshold = threshold;
        self
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            options: BackendOptions::default(),
            run_timeout: DEFAULT_RUN_TIMEOUT,
            fatal_threshold: DEFAULT_FATAL_THRESHOLD,
        }
    }
}

/// One cell of the benchmark matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpec {
    pub workload: WorkloadKind,
    pub operation_count: usize,
    pub concurrency: usize,
    pub policy: PlanPolicy,
    pub seed: u64,
    pub iterations: usize,
}

impl RunSpec {
    pub fn new(workload: WorkloadKind, operation_count: usize, concurrency: usize) -> Self {
        Self {
            workload,
            operation_count,
            concurrency,
            policy: PlanPolicy::default(),
            seed: 42,
            iterations: 1,
        }
    }

    /// Set the client plan policy.
    pub fn with_policy(mut self, policy: PlanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the workload seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the iteration count. Zero is raised to one.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Operations planned for one iteration.
    pub fn planned_per_iteration(&self) -> usize {
        self.policy
            .planned_operations(self.operation_count, self.concurrency)
    }
}

/// Measurements of one backend over one matrix cell, all iterations
/// combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub backend: BackendVariant,
    pub workload: WorkloadKind,
    pub operation_count: usize,
    pub concurrency: usize,
    pub plan_policy: PlanPolicy,
    pub iterations: usize,
    pub planned_operations: usize,
    pub dispatched: usize,
    pub successful: usize,
    pub failed: usize,
    pub fatal_failures: usize,
    pub transient_failures: usize,
    pub retried: usize,
    pub not_dispatched: usize,
    /// Wall time summed over iterations, backpressure waits included.
    pub elapsed_secs: f64,
    /// Successful operations per second of `elapsed_secs`.
    pub throughput: f64,
    pub throughput_spread: ThroughputSpread,
    pub latency: LatencySummary,
    pub histogram: Vec<BucketCount>,
    pub status: RunStatus,
    pub incomplete: bool,
    pub abort_reason: Option<AbortReason>,
    pub warmup_error: Option<String>,
    /// Fixture or runtime error that stopped the run before dispatch.
    pub run_error: Option<String>,
    pub failures: Vec<FailureRecord>,
}

impl RunResult {
    /// Grouping key shared by comparable runs.
    pub fn key(&self) -> (WorkloadKind, usize, usize) {
        (self.workload, self.operation_count, self.concurrency)
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Run-scoped stop signal shared by all logical clients.
struct RunControl {
    deadline: Option<Instant>,
    fatal_limit: f64,
    fatal: AtomicUsize,
    aborted: AtomicBool,
    reason: Mutex<Option<AbortReason>>,
}

impl RunControl {
    fn new(run_timeout: Duration, fatal_limit: f64) -> Self {
        Self {
            deadline: Instant::now().checked_add(run_timeout),
            fatal_limit,
            fatal: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    fn record_fatal(&self) {
        let fatal = self.fatal.fetch_add(1, Ordering::SeqCst) + 1;
        if fatal as f64 > self.fatal_limit {
            self.abort(AbortReason::FatalThresholdExceeded);
        }
    }

    /// Check if clients should stop dispatching.
    fn should_stop(&self) -> bool {
        if self.aborted.load(Ordering::SeqCst) {
            return true;
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.abort(AbortReason::RunTimeout);
            return true;
        }
        false
    }

    fn abort(&self, reason: AbortReason) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            tracing::warn!(?reason, "aborting run");
            *slot = Some(reason);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn reason(&self) -> Option<AbortReason> {
        *self.reason.lock()
    }
}

/// Outcome of one iteration.
struct Iteration {
    metrics: RunMetrics,
    elapsed: Duration,
    abort: Option<AbortReason>,
    warmup_error: Option<String>,
}

/// Drives runs of one backend variant at a time against a shared connector.
pub struct Simulator<C: Connector> {
    connector: Arc<C>,
    config: SimulatorConfig,
}

impl<C: Connector> Simulator<C> {
    pub fn new(connector: Arc<C>, config: SimulatorConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Execute one run.
    ///
    /// Must be called outside of any async runtime. Operation failures,
    /// warm-up failures, fixture and runtime errors all end up in the
    /// returned result; a run that could not be prepared is `Failed`.
    pub fn run(
        &self,
        variant: BackendVariant,
        spec: &RunSpec,
        generator: &WorkloadGenerator,
    ) -> RunResult {
        let plans = generator.plans_for_clients(
            spec.workload,
            spec.operation_count,
            spec.concurrency,
            spec.seed,
            spec.policy,
        );
        let per_iteration: usize = plans.iter().map(WorkloadPlan::len).sum();
        let iterations = spec.iterations.max(1);

        tracing::info!(
            backend = %variant,
            workload = %spec.workload,
            operations = spec.operation_count,
            concurrency = spec.concurrency,
            iterations,
            "starting run"
        );

        let mut totals = RunMetrics::default();
        let mut elapsed = Duration::ZERO;
        let mut samples = Vec::with_capacity(iterations);
        let mut abort = None;
        let mut warmup_error = None;
        let mut run_error = None;

        for iteration in 0..iterations {
            if abort.is_some() {
                totals.not_dispatched += per_iteration;
                continue;
            }
            let runtime = match self.prepare_iteration() {
                Ok(runtime) => runtime,
                Err(err) => {
                    tracing::error!(
                        backend = %variant,
                        iteration,
                        error = %err,
                        "run preparation failed"
                    );
                    abort = Some(match err {
                        RunError::Fixture(_) => AbortReason::FixtureResetFailed,
                        RunError::Runtime(_) => AbortReason::RuntimeFailed,
                    });
                    run_error = Some(err.to_string());
                    totals.not_dispatched += per_iteration;
                    continue;
                }
            };
            let outcome = runtime.block_on(self.run_once(variant, &plans, per_iteration));

            tracing::debug!(
                backend = %variant,
                iteration,
                successful = outcome.metrics.successful,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "iteration finished"
            );
            if outcome.warmup_error.is_none() {
                samples.push(throughput(outcome.metrics.successful, outcome.elapsed));
            }
            elapsed += outcome.elapsed;
            abort = outcome.abort;
            warmup_error = warmup_error.or(outcome.warmup_error);
            totals.absorb(outcome.metrics);
        }

        let planned = per_iteration * iterations;
        let threshold_exceeded =
            totals.fatal as f64 > self.config.fatal_threshold * planned as f64;
        if abort.is_none() && threshold_exceeded {
            abort = Some(AbortReason::FatalThresholdExceeded);
        }
        let status = if abort.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let result = RunResult {
            backend: variant,
            workload: spec.workload,
            operation_count: spec.operation_count,
            concurrency: spec.concurrency,
            plan_policy: spec.policy,
            iterations,
            planned_operations: planned,
            dispatched: totals.dispatched,
            successful: totals.successful,
            failed: totals.failed,
            fatal_failures: totals.fatal,
            transient_failures: totals.transient,
            retried: totals.retried,
            not_dispatched: totals.not_dispatched,
            elapsed_secs: elapsed.as_secs_f64(),
            throughput: throughput(totals.successful, elapsed),
            throughput_spread: ThroughputSpread::from_samples(&samples),
            latency: totals.latency_summary(),
            histogram: totals.histogram().snapshot(),
            status,
            incomplete: abort.is_some(),
            abort_reason: abort,
            warmup_error,
            run_error,
            failures: totals.failures().to_vec(),
        };

        tracing::info!(
            backend = %variant,
            workload = %spec.workload,
            operations = spec.operation_count,
            concurrency = spec.concurrency,
            dispatched = result.dispatched,
            failed = result.failed,
            throughput = result.throughput,
            status = ?result.status,
            "run finished"
        );
        result
    }

    /// Restore the fixture and build the iteration's runtime.
    fn prepare_iteration(&self) -> Result<tokio::runtime::Runtime, RunError> {
        self.connector.reset_fixture()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime)
    }

    async fn run_once(
        &self,
        variant: BackendVariant,
        plans: &[WorkloadPlan],
        planned: usize,
    ) -> Iteration {
        let mut phase = RunPhase::Idle;
        transition(&mut phase, RunPhase::Warming, variant);

        let backend =
            match BackendHandle::start(variant, self.connector.clone(), self.config.options).await
            {
                Ok(backend) => backend,
                Err(err) => {
                    tracing::warn!(backend = %variant, error = %err, "warm-up failed");
                    transition(&mut phase, RunPhase::Failed, variant);
                    let mut metrics = RunMetrics::default();
                    metrics.not_dispatched = planned;
                    return Iteration {
                        metrics,
                        elapsed: Duration::ZERO,
                        abort: Some(AbortReason::WarmupFailed),
                        warmup_error: Some(err.to_string()),
                    };
                }
            };

        transition(&mut phase, RunPhase::Running, variant);
        let control = RunControl::new(
            self.config.run_timeout,
            self.config.fatal_threshold * planned as f64,
        );
        let started = Instant::now();
        let clients = join_all(
            plans
                .iter()
                .map(|plan| drive_client(&backend, plan, &control)),
        )
        .await;
        let elapsed = started.elapsed();

        transition(&mut phase, RunPhase::Draining, variant);
        let metrics = RunMetrics::merge(clients);
        backend.shutdown().await;

        let abort = control.reason();
        let terminal = if abort.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Completed
        };
        transition(&mut phase, terminal, variant);

        Iteration {
            metrics,
            elapsed,
            abort,
            warmup_error: None,
        }
    }
}

/// Replay one plan in order until it is exhausted or the run aborts.
async fn drive_client<C: Connector>(
    backend: &BackendHandle<C>,
    plan: &WorkloadPlan,
    control: &RunControl,
) -> ClientMetrics {
    let mut metrics = ClientMetrics::new(plan.client());
    for (index, op) in plan.operations().iter().enumerate() {
        if control.should_stop() {
            metrics.skip(plan.len() - index);
            break;
        }
        let outcome = backend.execute(op).await;
        if outcome.is_fatal() {
            control.record_fatal();
        }
        metrics.observe(index, &outcome);
    }
    metrics
}

fn transition(phase: &mut RunPhase, next: RunPhase, variant: BackendVariant) {
    tracing::debug!(backend = %variant, from = %phase, to = %next, "run phase");
    *phase = next;
}
