//! Comparison report.
//!
//! Pairs cooperative and pooled runs that share a matrix cell and derives
//! the relative throughput difference. The convention is fixed: cooperative
//! is always measured against pooled.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::BackendVariant;
use crate::simulator::{RunResult, RunStatus};
use crate::workload::{MixRatio, PlanPolicy, WorkloadKind};

/// Version of the serialized report layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Formula used for `diff_percent`, recorded in report metadata.
pub const DIFF_CONVENTION: &str =
    "(cooperative.throughput - pooled.throughput) / pooled.throughput * 100";

/// Faster backend of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Cooperative,
    Pooled,
    Tie,
}

impl Winner {
    fn from_throughput(cooperative: f64, pooled: f64) -> Self {
        if cooperative > pooled {
            Winner::Cooperative
        } else if pooled > cooperative {
            Winner::Pooled
        } else {
            Winner::Tie
        }
    }
}

/// Per-backend figures carried in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSummary {
    pub throughput: f64,
    pub elapsed_secs: f64,
    pub dispatched: usize,
    pub successful: usize,
    pub failed: usize,
    pub mean_latency_us: f64,
    pub p95_latency_us: u64,
    pub status: RunStatus,
    pub incomplete: bool,
}

impl From<&RunResult> for BackendSummary {
    fn from(run: &RunResult) -> Self {
        Self {
            throughput: run.throughput,
            elapsed_secs: run.elapsed_secs,
            dispatched: run.dispatched,
            successful: run.successful,
            failed: run.failed,
            mean_latency_us: run.latency.mean_us,
            p95_latency_us: run.latency.p95_us,
            status: run.status,
            incomplete: run.incomplete,
        }
    }
}

/// Cooperative and pooled runs of one matrix cell, compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub workload: WorkloadKind,
    pub operation_count: usize,
    pub concurrency: usize,
    pub cooperative: BackendSummary,
    pub pooled: BackendSummary,
    /// `None` when pooled throughput is zero.
    pub diff_percent: Option<f64>,
    pub winner: Winner,
}

/// Relative difference of `a` against `b`, in percent.
pub fn percentage_difference(a: f64, b: f64) -> Option<f64> {
    if b == 0.0 {
        None
    } else {
        Some((a - b) / b * 100.0)
    }
}

/// Compare two runs of the same matrix cell.
///
/// # Panics
///
/// Panics if the runs do not share (workload, operation count, concurrency)
/// or are not a cooperative and a pooled run, in that order.
pub fn aggregate(cooperative: &RunResult, pooled: &RunResult) -> ComparisonRecord {
    assert_eq!(
        cooperative.key(),
        pooled.key(),
        "compared runs must share workload, operation count and concurrency"
    );
    assert_eq!(cooperative.backend, BackendVariant::Cooperative);
    assert_eq!(pooled.backend, BackendVariant::Pooled);

    ComparisonRecord {
        workload: cooperative.workload,
        operation_count: cooperative.operation_count,
        concurrency: cooperative.concurrency,
        cooperative: BackendSummary::from(cooperative),
        pooled: BackendSummary::from(pooled),
        diff_percent: percentage_difference(cooperative.throughput, pooled.throughput),
        winner: Winner::from_throughput(cooperative.throughput, pooled.throughput),
    }
}

/// Pair cooperative and pooled runs by exact key, in discovery order of the
/// cooperative run. Runs without a partner are left out.
pub fn pair_runs(runs: &[RunResult]) -> Vec<ComparisonRecord> {
    runs.iter()
        .filter(|run| run.backend == BackendVariant::Cooperative)
        .filter_map(|cooperative| {
            runs.iter()
                .find(|run| run.backend == BackendVariant::Pooled && run.key() == cooperative.key())
                .map(|pooled| aggregate(cooperative, pooled))
        })
        .collect()
}

/// Wins, ties and mean difference over a group of comparisons.
struct Tally {
    comparisons: usize,
    cooperative_wins: usize,
    pooled_wins: usize,
    ties: usize,
    avg_diff_percent: Option<f64>,
    overall_faster: Winner,
}

impl Tally {
    fn of<'a>(records: impl Iterator<Item = &'a ComparisonRecord>) -> Self {
        let mut tally = Tally {
            comparisons: 0,
            cooperative_wins: 0,
            pooled_wins: 0,
            ties: 0,
            avg_diff_percent: None,
            overall_faster: Winner::Tie,
        };
        let mut diffs = Vec::new();
        for record in records {
            tally.comparisons += 1;
            match record.winner {
                Winner::Cooperative => tally.cooperative_wins += 1,
                Winner::Pooled => tally.pooled_wins += 1,
                Winner::Tie => tally.ties += 1,
            }
            diffs.extend(record.diff_percent);
        }
        if !diffs.is_empty() {
            tally.avg_diff_percent = Some(diffs.iter().sum::<f64>() / diffs.len() as f64);
        }
        tally.overall_faster = match tally.cooperative_wins.cmp(&tally.pooled_wins) {
            std::cmp::Ordering::Greater => Winner::Cooperative,
            std::cmp::Ordering::Less => Winner::Pooled,
            std::cmp::Ordering::Equal => Winner::Tie,
        };
        tally
    }
}

/// Win tally for one workload kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSummary {
    pub workload: WorkloadKind,
    pub comparisons: usize,
    pub cooperative_wins: usize,
    pub pooled_wins: usize,
    pub ties: usize,
    /// Mean of the defined `diff_percent` values.
    pub avg_diff_percent: Option<f64>,
    pub overall_faster: Winner,
}

impl WorkloadSummary {
    fn tally(workload: WorkloadKind, records: &[ComparisonRecord]) -> Self {
        let tally = Tally::of(records.iter().filter(|r| r.workload == workload));
        Self {
            workload,
            comparisons: tally.comparisons,
            cooperative_wins: tally.cooperative_wins,
            pooled_wins: tally.pooled_wins,
            ties: tally.ties,
            avg_diff_percent: tally.avg_diff_percent,
            overall_faster: tally.overall_faster,
        }
    }
}

/// Win tally for one concurrency level, across workloads and counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencySummary {
    pub concurrency: usize,
    pub comparisons: usize,
    pub cooperative_wins: usize,
    pub pooled_wins: usize,
    pub ties: usize,
    /// Mean of the defined `diff_percent` values.
    pub avg_diff_percent: Option<f64>,
    pub overall_faster: Winner,
}

impl ConcurrencySummary {
    fn tally(concurrency: usize, records: &[ComparisonRecord]) -> Self {
        let tally = Tally::of(records.iter().filter(|r| r.concurrency == concurrency));
        Self {
            concurrency,
            comparisons: tally.comparisons,
            cooperative_wins: tally.cooperative_wins,
            pooled_wins: tally.pooled_wins,
            ties: tally.ties,
            avg_diff_percent: tally.avg_diff_percent,
            overall_faster: tally.overall_faster,
        }
    }
}

/// Host the report was produced on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub cpu_cores: u32,
    pub crate_version: String,
    pub build_profile: String,
}

impl EnvironmentInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_cores: std::thread::available_parallelism()
                .map(|p| p.get() as u32)
                .unwrap_or(1),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            build_profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
        }
    }
}

/// Settings that shaped every run in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub timestamp: DateTime<Utc>,
    pub environment: EnvironmentInfo,
    pub store: String,
    pub seed: u64,
    pub plan_policy: PlanPolicy,
    pub iterations: usize,
    pub pool_size: usize,
    pub workers: usize,
    pub op_timeout_ms: u64,
    /// Zero when the run timeout is disabled.
    pub run_timeout_secs: u64,
    pub fatal_threshold: f64,
    pub mix_ratio: MixRatio,
    pub diff_convention: String,
}

/// Complete output of one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub schema_version: u32,
    pub metadata: ReportMetadata,
    pub comparisons: Vec<ComparisonRecord>,
    pub summaries: Vec<WorkloadSummary>,
    /// Per concurrency level, in order of first appearance.
    pub concurrency_summaries: Vec<ConcurrencySummary>,
    /// Every run, paired or not, in execution order.
    pub runs: Vec<RunResult>,
}

impl ComparisonReport {
    /// Assemble the report. Records are stably sorted by operation count,
    /// then concurrency; workload order among equal keys is kept as given.
    pub fn build(
        mut records: Vec<ComparisonRecord>,
        runs: Vec<RunResult>,
        metadata: ReportMetadata,
    ) -> Self {
        records.sort_by_key(|r| (r.operation_count, r.concurrency));

        let mut workloads: Vec<WorkloadKind> = Vec::new();
        for record in &records {
            if !workloads.contains(&record.workload) {
                workloads.push(record.workload);
            }
        }
        let summaries = workloads
            .into_iter()
            .map(|workload| WorkloadSummary::tally(workload, &records))
            .collect();

        let mut levels: Vec<usize> = Vec::new();
        for record in &records {
            if !levels.contains(&record.concurrency) {
                levels.push(record.concurrency);
            }
        }
        let concurrency_summaries = levels
            .into_iter()
            .map(|level| ConcurrencySummary::tally(level, &records))
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            metadata,
            comparisons: records,
            summaries,
            concurrency_summaries,
            runs,
        }
    }

    /// Check if any run ended in the failed state.
    pub fn has_failed_runs(&self) -> bool {
        self.runs.iter().any(RunResult::is_failed)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LatencySummary, ThroughputSpread};

    fn run(
        backend: BackendVariant,
        workload: WorkloadKind,
        count: usize,
        concurrency: usize,
        throughput: f64,
    ) -> RunResult {
        RunResult {
            backend,
            workload,
            operation_count: count,
            concurrency,
            plan_policy: PlanPolicy::Replicate,
            iterations: 1,
            planned_operations: count * concurrency,
            dispatched: count * concurrency,
            successful: count * concurrency,
            failed: 0,
            fatal_failures: 0,
            transient_failures: 0,
            retried: 0,
            not_dispatched: 0,
            elapsed_secs: 1.0,
            throughput,
            throughput_spread: ThroughputSpread::default(),
            latency: LatencySummary::default(),
            histogram: Vec::new(),
            status: RunStatus::Completed,
            incomplete: false,
            abort_reason: None,
            warmup_error: None,
            run_error: None,
            failures: Vec::new(),
        }
    }

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            timestamp: Utc::now(),
            environment: EnvironmentInfo::collect(),
            store: "memory".to_string(),
            seed: 42,
            plan_policy: PlanPolicy::Replicate,
            iterations: 1,
            pool_size: 5,
            workers: 5,
            op_timeout_ms: 5000,
            run_timeout_secs: 300,
            fatal_threshold: 0.5,
            mix_ratio: MixRatio::default(),
            diff_convention: DIFF_CONVENTION.to_string(),
        }
    }

    use crate::backend::BackendVariant::{Cooperative, Pooled};
    use crate::workload::WorkloadKind::{Mixed, Standard};

    #[test]
    fn test_aggregate_diff_and_winner() {
        let record = aggregate(
            &run(Cooperative, Standard, 50, 1, 150.0),
            &run(Pooled, Standard, 50, 1, 100.0),
        );
        assert_eq!(record.diff_percent, Some(50.0));
        assert_eq!(record.winner, Winner::Cooperative);

        let record = aggregate(
            &run(Cooperative, Standard, 50, 1, 80.0),
            &run(Pooled, Standard, 50, 1, 100.0),
        );
        assert!((record.diff_percent.unwrap() + 20.0).abs() < 1e-9);
        assert_eq!(record.winner, Winner::Pooled);
    }

    #[test]
    fn test_zero_pooled_throughput() {
        let record = aggregate(
            &run(Cooperative, Standard, 10, 1, 0.0),
            &run(Pooled, Standard, 10, 1, 0.0),
        );
        assert_eq!(record.diff_percent, None);
        assert_eq!(record.winner, Winner::Tie);
    }

    #[test]
    fn test_difference_is_antisymmetric_in_sign() {
        for (a, b) in [(120.0, 100.0), (3.5, 9.0), (1000.0, 999.0)] {
            let forward = percentage_difference(a, b).unwrap();
            let backward = percentage_difference(b, a).unwrap();
            assert!(forward.signum() == -backward.signum());
        }
        assert_eq!(percentage_difference(5.0, 5.0), Some(0.0));
    }

    #[test]
    #[should_panic(expected = "must share")]
    fn test_mismatched_key_panics() {
        aggregate(
            &run(Cooperative, Standard, 50, 1, 1.0),
            &run(Pooled, Standard, 100, 1, 1.0),
        );
    }

    #[test]
    #[should_panic]
    fn test_wrong_variants_panic() {
        aggregate(
            &run(Pooled, Standard, 50, 1, 1.0),
            &run(Cooperative, Standard, 50, 1, 1.0),
        );
    }

    #[test]
    fn test_pair_runs_skips_unpaired() {
        let runs = vec![
            run(Cooperative, Standard, 10, 1, 10.0),
            run(Cooperative, Standard, 10, 5, 10.0),
            run(Pooled, Standard, 10, 1, 5.0),
        ];
        let records = pair_runs(&runs);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].concurrency, 1);
    }

    #[test]
    fn test_build_orders_records() {
        let records = vec![
            aggregate(&run(Cooperative, Mixed, 100, 1, 1.0), &run(Pooled, Mixed, 100, 1, 2.0)),
            aggregate(&run(Cooperative, Standard, 10, 5, 1.0), &run(Pooled, Standard, 10, 5, 2.0)),
            aggregate(&run(Cooperative, Mixed, 10, 1, 3.0), &run(Pooled, Mixed, 10, 1, 2.0)),
            aggregate(&run(Cooperative, Standard, 10, 1, 3.0), &run(Pooled, Standard, 10, 1, 2.0)),
        ];
        let report = ComparisonReport::build(records, Vec::new(), metadata());
        let keys: Vec<_> = report
            .comparisons
            .iter()
            .map(|r| (r.workload, r.operation_count, r.concurrency))
            .collect();
        assert_eq!(
            keys,
            vec![(Mixed, 10, 1), (Standard, 10, 1), (Standard, 10, 5), (Mixed, 100, 1)]
        );
        assert_eq!(report.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_workload_summaries() {
        let records = vec![
            aggregate(&run(Cooperative, Standard, 10, 1, 3.0), &run(Pooled, Standard, 10, 1, 2.0)),
            aggregate(&run(Cooperative, Standard, 50, 1, 3.0), &run(Pooled, Standard, 50, 1, 1.0)),
            aggregate(&run(Cooperative, Standard, 100, 1, 1.0), &run(Pooled, Standard, 100, 1, 2.0)),
            aggregate(&run(Cooperative, Mixed, 10, 1, 2.0), &run(Pooled, Mixed, 10, 1, 2.0)),
        ];
        let report = ComparisonReport::build(records, Vec::new(), metadata());
        let standard = &report.summaries[0];
        assert_eq!(standard.workload, Standard);
        assert_eq!(standard.cooperative_wins, 2);
        assert_eq!(standard.pooled_wins, 1);
        assert_eq!(standard.overall_faster, Winner::Cooperative);
        assert!((standard.avg_diff_percent.unwrap() - 200.0 / 3.0).abs() < 1e-9);

        let mixed = &report.summaries[1];
        assert_eq!(mixed.ties, 1);
        assert_eq!(mixed.overall_faster, Winner::Tie);
    }

    #[test]
    fn test_concurrency_summaries() {
        let records = vec![
            aggregate(&run(Cooperative, Standard, 10, 5, 3.0), &run(Pooled, Standard, 10, 5, 2.0)),
            aggregate(&run(Cooperative, Standard, 10, 1, 1.0), &run(Pooled, Standard, 10, 1, 2.0)),
            aggregate(&run(Cooperative, Mixed, 10, 5, 4.0), &run(Pooled, Mixed, 10, 5, 2.0)),
            aggregate(&run(Cooperative, Mixed, 10, 1, 0.0), &run(Pooled, Mixed, 10, 1, 0.0)),
        ];
        let report = ComparisonReport::build(records, Vec::new(), metadata());
        // Records are sorted by (count, concurrency) before grouping.
        let levels: Vec<_> = report
            .concurrency_summaries
            .iter()
            .map(|s| s.concurrency)
            .collect();
        assert_eq!(levels, vec![1, 5]);

        let single = &report.concurrency_summaries[0];
        assert_eq!(single.comparisons, 2);
        assert_eq!(single.pooled_wins, 1);
        assert_eq!(single.ties, 1);
        assert_eq!(single.overall_faster, Winner::Pooled);
        assert!((single.avg_diff_percent.unwrap() + 50.0).abs() < 1e-9);

        let five = &report.concurrency_summaries[1];
        assert_eq!(five.cooperative_wins, 2);
        assert_eq!(five.overall_faster, Winner::Cooperative);
        assert!((five.avg_diff_percent.unwrap() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_write_json() {
        let runs = vec![
            run(Cooperative, Standard, 10, 1, 3.0),
            run(Pooled, Standard, 10, 1, 2.0),
        ];
        let report = ComparisonReport::build(pair_runs(&runs), runs, metadata());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["comparisons"][0]["winner"], "cooperative");
        assert_eq!(value["runs"].as_array().unwrap().len(), 2);
        assert_eq!(value["concurrency_summaries"][0]["concurrency"], 1);
        assert_eq!(value["metadata"]["mix_ratio"]["insert"], 1);
        assert!(!report.has_failed_runs());
    }
}
