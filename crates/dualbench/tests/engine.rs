//! End-to-end benchmark runs against the memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dualbench::{run_benchmark, run_with_connector, BenchConfig, ConfigError, Engine, Error};
use dualbench_core::store::memory::{MemoryBlockingConnection, MemoryConnection};
use dualbench_core::{
    AbortReason, BackendVariant, Connector, FixtureSpec, MemoryConfig, MemoryConnector,
    PlanPolicy, RunStatus, StoreError, Winner, WorkloadKind,
};

fn fixture() -> FixtureSpec {
    FixtureSpec::new(100, 100)
}

fn connector() -> Arc<MemoryConnector> {
    Arc::new(MemoryConnector::new(
        MemoryConfig::new(fixture()).with_io_latency(Duration::from_micros(20)),
    ))
}

fn config(workload: WorkloadKind, count: usize, concurrency: usize) -> BenchConfig {
    BenchConfig::new()
        .with_counts(vec![count])
        .with_concurrency(vec![concurrency])
        .with_workloads(vec![workload])
        .with_fixture(fixture())
        .with_io_latency(Duration::from_micros(20))
        .with_pool_size(2)
        .with_workers(2)
}

#[test]
fn test_standard_run_pairs_both_backends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let outcome = run_with_connector(
        connector(),
        config(WorkloadKind::Standard, 50, 1).with_output(&path),
    )
    .unwrap();

    let report = &outcome.report;
    assert_eq!(report.comparisons.len(), 1);
    let record = &report.comparisons[0];
    assert_eq!(record.cooperative.dispatched, 50);
    assert_eq!(record.pooled.dispatched, 50);
    assert_eq!(record.cooperative.successful, 50);
    assert_eq!(record.pooled.successful, 50);
    assert!(matches!(
        record.winner,
        Winner::Cooperative | Winner::Pooled | Winner::Tie
    ));
    assert_eq!(outcome.exit_code(), 0);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["comparisons"].as_array().unwrap().len(), 1);
    assert!(!written["comparisons"][0]["winner"].is_null());
    assert_eq!(written["metadata"]["plan_policy"], "replicate");
    assert_eq!(written["metadata"]["store"], "memory");
}

#[test]
fn test_fatal_failure_in_mixed_run_is_recorded() {
    let store = connector();
    // Executes are counted across the store's lifetime; the cooperative run
    // goes first, so its third operation fails.
    store.inject_fault(3, StoreError::ConstraintViolation("injected".into()));

    let dir = tempfile::tempdir().unwrap();
    let outcome = run_with_connector(
        store,
        config(WorkloadKind::Mixed, 10, 1).with_output(dir.path().join("report.json")),
    )
    .unwrap();

    let cooperative = &outcome.report.runs[0];
    assert_eq!(cooperative.backend, BackendVariant::Cooperative);
    assert!(!cooperative.incomplete);
    assert_eq!(cooperative.status, RunStatus::Completed);
    assert_eq!(cooperative.failed, 1);
    assert_eq!(cooperative.successful, 9);
    let expected = 9.0 / cooperative.elapsed_secs;
    assert!((cooperative.throughput - expected).abs() <= expected * 1e-9);

    let pooled = &outcome.report.runs[1];
    assert_eq!(pooled.failed, 0);
    assert_eq!(outcome.exit_code(), 0);
}

#[test]
fn test_zero_concurrency_writes_no_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let err = run_benchmark(config(WorkloadKind::Standard, 10, 0).with_output(&path)).unwrap_err();

    assert!(matches!(
        err,
        Error::Config(ConfigError::NonPositiveConcurrency)
    ));
    assert_eq!(err.exit_code(), 2);
    assert!(!path.exists());
}

#[test]
fn test_replicated_reads_are_concurrency_independent() {
    let single = Engine::new(connector(), config(WorkloadKind::Parallel, 40, 1))
        .unwrap()
        .run();
    let many = Engine::new(connector(), config(WorkloadKind::Parallel, 40, 4))
        .unwrap()
        .run();

    for (one, four) in single.runs.iter().zip(many.runs.iter()) {
        assert_eq!(one.backend, four.backend);
        assert_eq!(one.failed, 0);
        assert_eq!(four.failed, 0);
        assert_eq!(one.successful, 40);
        assert_eq!(four.successful, 4 * 40);
    }
}

#[test]
fn test_divide_policy_splits_operations() {
    let report = Engine::new(
        connector(),
        config(WorkloadKind::Standard, 30, 4).with_plan_policy(PlanPolicy::Divide),
    )
    .unwrap()
    .run();
    assert!(report.runs.iter().all(|run| run.dispatched == 30));
    assert_eq!(report.metadata.plan_policy, PlanPolicy::Divide);
}

#[test]
fn test_repeated_invocations_dispatch_identically() {
    let run = || {
        Engine::new(connector(), config(WorkloadKind::Mixed, 24, 2).with_seed(7))
            .unwrap()
            .run()
    };
    let first = run();
    let second = run();
    let counts = |report: &dualbench_core::ComparisonReport| {
        report
            .runs
            .iter()
            .map(|r| (r.backend, r.dispatched, r.successful, r.failed))
            .collect::<Vec<_>>()
    };
    assert_eq!(counts(&first), counts(&second));
}

#[test]
fn test_swapping_backends_negates_difference() {
    let report = Engine::new(connector(), config(WorkloadKind::Complex, 12, 2))
        .unwrap()
        .run();
    let record = &report.comparisons[0];
    let forward = dualbench_core::percentage_difference(
        record.cooperative.throughput,
        record.pooled.throughput,
    );
    let backward = dualbench_core::percentage_difference(
        record.pooled.throughput,
        record.cooperative.throughput,
    );
    if let (Some(forward), Some(backward)) = (forward, backward) {
        assert!(forward == 0.0 && backward == 0.0 || forward.signum() == -backward.signum());
    }
    assert_eq!(record.diff_percent, forward);
}

#[test]
fn test_fatal_threshold_fails_run_and_exit_code() {
    let store = connector();
    for call in 1..=5 {
        store.inject_fault(call, StoreError::MalformedOperation("injected".into()));
    }
    let dir = tempfile::tempdir().unwrap();
    let outcome = run_with_connector(
        store,
        config(WorkloadKind::Standard, 8, 1)
            .with_fatal_threshold(0.5)
            .with_output(dir.path().join("report.json")),
    )
    .unwrap();

    let cooperative = &outcome.report.runs[0];
    assert_eq!(cooperative.status, RunStatus::Failed);
    assert!(cooperative.incomplete);
    assert_eq!(cooperative.dispatched, 5);
    assert_eq!(cooperative.not_dispatched, 3);
    assert_eq!(outcome.exit_code(), 1);
}

/// Memory store whose second fixture reset fails.
struct FlakyReset {
    inner: MemoryConnector,
    resets: AtomicUsize,
}

impl Connector for FlakyReset {
    type Async = MemoryConnection;
    type Blocking = MemoryBlockingConnection;

    fn name(&self) -> &str {
        "flaky-reset"
    }

    async fn connect_async(&self) -> Result<MemoryConnection, StoreError> {
        self.inner.connect_async().await
    }

    fn connect_blocking(&self) -> Result<MemoryBlockingConnection, StoreError> {
        self.inner.connect_blocking()
    }

    fn reset_fixture(&self) -> Result<(), StoreError> {
        if self.resets.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(StoreError::ConnectionReset("reset dropped".into()));
        }
        self.inner.reset_fixture()
    }
}

#[test]
fn test_reset_failure_still_writes_report() {
    let store = Arc::new(FlakyReset {
        inner: MemoryConnector::new(
            MemoryConfig::new(fixture()).with_io_latency(Duration::from_micros(20)),
        ),
        resets: AtomicUsize::new(0),
    });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.json");
    let outcome = run_with_connector(
        store,
        config(WorkloadKind::Standard, 10, 1).with_output(&path),
    )
    .unwrap();

    let cooperative = &outcome.report.runs[0];
    assert_eq!(cooperative.status, RunStatus::Completed);
    assert_eq!(cooperative.successful, 10);

    let pooled = &outcome.report.runs[1];
    assert_eq!(pooled.status, RunStatus::Failed);
    assert_eq!(pooled.abort_reason, Some(AbortReason::FixtureResetFailed));
    assert_eq!(pooled.dispatched, 0);
    assert_eq!(pooled.not_dispatched, 10);
    assert!(pooled.run_error.as_deref().unwrap().contains("reset dropped"));
    assert_eq!(outcome.exit_code(), 1);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["runs"].as_array().unwrap().len(), 2);
    assert_eq!(written["runs"][1]["abort_reason"], "fixture_reset_failed");
}
