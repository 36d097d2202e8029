//! Metrics collection.
//!
//! Each logical client accumulates into its own [`ClientMetrics`]; the
//! simulator merges them once while draining, so no event is shared between
//! clients while the run is in flight.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::OperationOutcome;
use crate::error::{ErrorKind, FailureClass};

/// Bucket boundaries in microseconds: 100us, 500us, 1ms, 5ms, 10ms, 50ms,
/// 100ms, 500ms, 1s, 5s. Larger values land in an overflow bucket.
pub const LATENCY_BUCKETS_US: [u64; 10] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

/// Maximum failure samples kept per run.
pub const MAX_FAILURE_SAMPLES: usize = 64;

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyHistogram {
    counts: [u64; LATENCY_BUCKETS_US.len() + 1],
}

/// One histogram bucket. `le_us` is `None` for the overflow bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub le_us: Option<u64>,
    pub count: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value in microseconds.
    pub fn observe(&mut self, value_us: u64) {
        let index = LATENCY_BUCKETS_US
            .iter()
            .position(|&boundary| value_us <= boundary)
            .unwrap_or(LATENCY_BUCKETS_US.len());
        self.counts[index] += 1;
    }

    /// Add another histogram's counts into this one.
    pub fn merge(&mut self, other: &LatencyHistogram) {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts.iter()) {
            *mine += theirs;
        }
    }

    pub fn count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Per-bucket counts, overflow last.
    pub fn snapshot(&self) -> Vec<BucketCount> {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &count)| BucketCount {
                le_us: LATENCY_BUCKETS_US.get(i).copied(),
                count,
            })
            .collect()
    }
}

/// A failed operation kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub client: usize,
    pub operation_index: usize,
    pub kind: ErrorKind,
    pub class: FailureClass,
    pub message: String,
}

/// Accumulator owned by one logical client.
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    pub client: usize,
    pub dispatched: usize,
    pub successful: usize,
    pub failed: usize,
    pub fatal: usize,
    pub transient: usize,
    pub retried: usize,
    pub not_dispatched: usize,
    latencies_us: Vec<u64>,
    histogram: LatencyHistogram,
    failures: Vec<FailureRecord>,
}

impl ClientMetrics {
    pub fn new(client: usize) -> Self {
        Self {
            client,
            dispatched: 0,
            successful: 0,
            failed: 0,
            fatal: 0,
            transient: 0,
            retried: 0,
            not_dispatched: 0,
            latencies_us: Vec::new(),
            histogram: LatencyHistogram::new(),
            failures: Vec::new(),
        }
    }

    /// Record one completed dispatch.
    pub fn observe(&mut self, operation_index: usize, outcome: &OperationOutcome) {
        self.dispatched += 1;

        if outcome.attempts > 1 {
            self.retried += 1;
        }

        let latency_us = outcome.latency.as_micros() as u64;
        self.latencies_us.push(latency_us);
        self.histogram.observe(latency_us);

        match &outcome.failure {
            None => self.successful += 1,
            Some(failure) => {
                self.failed += 1;
                match failure.kind.class() {
                    FailureClass::Fatal => self.fatal += 1,
                    FailureClass::Transient => self.transient += 1,
                }
                if self.failures.len() < MAX_FAILURE_SAMPLES {
                    self.failures.push(FailureRecord {
                        client: self.client,
                        operation_index,
                        kind: failure.kind,
                        class: failure.kind.class(),
                        message: failure.message.clone(),
                    });
                }
            }
        }
    }

    /// Record operations that were never dispatched because the run aborted.
    pub fn skip(&mut self, remaining: usize) {
        self.not_dispatched += remaining;
    }
}

/// Merged accumulator for a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    pub dispatched: usize,
    pub successful: usize,
    pub failed: usize,
    pub fatal: usize,
    pub transient: usize,
    pub retried: usize,
    pub not_dispatched: usize,
    latencies_us: Vec<u64>,
    histogram: LatencyHistogram,
    failures: Vec<FailureRecord>,
}

impl RunMetrics {
    /// Merge per-client accumulators.
    pub fn merge(clients: impl IntoIterator<Item = ClientMetrics>) -> Self {
        let mut run = RunMetrics::default();
        for client in clients {
            run.dispatched += client.dispatched;
            run.successful += client.successful;
            run.failed += client.failed;
            run.fatal += client.fatal;
            run.transient += client.transient;
            run.retried += client.retried;
            run.not_dispatched += client.not_dispatched;
            run.latencies_us.extend(client.latencies_us);
            run.histogram.merge(&client.histogram);
            run.push_failures(client.failures);
        }
        run
    }

    /// Fold another run's totals into this one.
    pub fn absorb(&mut self, other: RunMetrics) {
        self.dispatched += other.dispatched;
        self.successful += other.successful;
        self.failed += other.failed;
        self.fatal += other.fatal;
        self.transient += other.transient;
        self.retried += other.retried;
        self.not_dispatched += other.not_dispatched;
        self.latencies_us.extend(other.latencies_us);
        self.histogram.merge(&other.histogram);
        self.push_failures(other.failures);
    }

    fn push_failures(&mut self, failures: Vec<FailureRecord>) {
        let room = MAX_FAILURE_SAMPLES.saturating_sub(self.failures.len());
        self.failures.extend(failures.into_iter().take(room));
    }

    pub fn latency_summary(&self) -> LatencySummary {
        LatencySummary::from_samples(&self.latencies_us)
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

}

/// Latency statistics in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_us: f64,
    pub min_us: u64,
    pub max_us: u64,
    pub stdev_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

impl LatencySummary {
    /// Summarize raw samples. Percentiles use the nearest-rank method.
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len();
        let mean = sorted.iter().sum::<u64>() as f64 / count as f64;
        let stdev = if count > 1 {
            let variance = sorted
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };
        let percentile = |p: f64| {
            let rank = ((p * count as f64).ceil() as usize).clamp(1, count);
            sorted[rank - 1]
        };

        Self {
            count: count as u64,
            mean_us: mean,
            min_us: sorted[0],
            max_us: sorted[count - 1],
            stdev_us: stdev,
            p50_us: percentile(0.50),
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
        }
    }
}

/// Spread of per-iteration throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSpread {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub stdev: f64,
}

impl ThroughputSpread {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let stdev = if n > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };

        Self {
            mean,
            median,
            min: sorted[0],
            max: sorted[n - 1],
            stdev,
        }
    }
}

/// Successful operations per second of wall time. Zero when no time elapsed.
pub fn throughput(successful: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        successful as f64 / secs
    } else {
        0.0
    }
}
