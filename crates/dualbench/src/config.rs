//! Benchmark configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use dualbench_core::backend::{DEFAULT_OP_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_WORKERS};
use dualbench_core::simulator::{DEFAULT_FATAL_THRESHOLD, DEFAULT_RUN_TIMEOUT};
use dualbench_core::store::fixture::{DEFAULT_FIXTURE_PRODUCTS, DEFAULT_FIXTURE_USERS};
use dualbench_core::store::memory::DEFAULT_IO_LATENCY;
use dualbench_core::{
    BackendOptions, BackendVariant, FixtureSpec, MemoryConfig, MixRatio, PlanPolicy,
    SimulatorConfig, WorkloadKind,
};

use crate::error::ConfigError;

/// Default report path.
pub const DEFAULT_OUTPUT: &str = "benchmark_report.json";

/// Default workload seed.
pub const DEFAULT_SEED: u64 = 42;

/// Default operation counts of the benchmark matrix.
pub const DEFAULT_COUNTS: [usize; 5] = [10, 50, 100, 500, 1000];

/// Default concurrency levels of the benchmark matrix.
pub const DEFAULT_CONCURRENCY: [usize; 2] = [1, 5];

/// Which backends to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendSelection {
    /// Both variants, cooperative first
    Both,
    /// Cooperative only
    Cooperative,
    /// Pooled-thread only
    Pooled,
}

impl BackendSelection {
    /// Variants in execution order.
    pub fn variants(self) -> Vec<BackendVariant> {
        match self {
            BackendSelection::Both => BackendVariant::ALL.to_vec(),
            BackendSelection::Cooperative => vec![BackendVariant::Cooperative],
            BackendSelection::Pooled => vec![BackendVariant::Pooled],
        }
    }
}

impl fmt::Display for BackendSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSelection::Both => write!(f, "both"),
            BackendSelection::Cooperative => write!(f, "cooperative"),
            BackendSelection::Pooled => write!(f, "pooled"),
        }
    }
}

/// Backing store under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// In-process fixture tables with simulated I/O latency
    Memory,
    /// PostgreSQL at DATABASE_URL
    Postgres,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "memory"),
            StoreKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Benchmark configuration.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Operation counts, one matrix row each.
    pub counts: Vec<usize>,

    /// Concurrency levels, one matrix column each.
    pub concurrency: Vec<usize>,

    /// Workload kinds, in execution order.
    pub workloads: Vec<WorkloadKind>,

    /// Backends to run for every cell.
    pub backends: BackendSelection,

    /// Seed for workload generation.
    pub seed: u64,

    /// Per-operation timeout.
    pub op_timeout: Duration,

    /// Wall-clock budget per run iteration.
    pub run_timeout: Duration,

    /// Report path.
    pub output: PathBuf,

    /// Iterations per run.
    pub iterations: usize,

    /// Cooperative connection pool capacity.
    pub pool_size: usize,

    /// Pooled-thread worker count.
    pub workers: usize,

    /// Fraction of planned operations allowed to fail fatally.
    pub fatal_threshold: f64,

    /// How operation counts map onto logical clients.
    pub plan_policy: PlanPolicy,

    /// Mixed workload operation ratio.
    pub mix: MixRatio,

    /// Backing store.
    pub store: StoreKind,

    /// Simulated round trip of the memory store.
    pub io_latency: Duration,

    /// Fixture table sizes.
    pub fixture: FixtureSpec,
}

impl BenchConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            counts: DEFAULT_COUNTS.to_vec(),
            concurrency: DEFAULT_CONCURRENCY.to_vec(),
            workloads: WorkloadKind::ALL.to_vec(),
            backends: BackendSelection::Both,
            seed: DEFAULT_SEED,
            op_timeout: DEFAULT_OP_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            output: PathBuf::from(DEFAULT_OUTPUT),
            iterations: 1,
            pool_size: DEFAULT_POOL_SIZE,
            workers: DEFAULT_WORKERS,
            fatal_threshold: DEFAULT_FATAL_THRESHOLD,
            plan_policy: PlanPolicy::default(),
            mix: MixRatio::default(),
            store: StoreKind::Memory,
            io_latency: DEFAULT_IO_LATENCY,
            fixture: FixtureSpec::default(),
        }
    }

    /// Set the operation counts.
    pub fn with_counts(mut self, counts: impl Into<Vec<usize>>) -> Self {
        self.counts = counts.into();
        self
    }

    /// Set the concurrency levels.
    pub fn with_concurrency(mut self, levels: impl Into<Vec<usize>>) -> Self {
        self.concurrency = levels.into();
        self
    }

    /// Set the workload kinds.
    pub fn with_workloads(mut self, workloads: impl Into<Vec<WorkloadKind>>) -> Self {
        self.workloads = workloads.into();
        self
    }

    /// Set the backends to run.
    pub fn with_backends(mut self, backends: BackendSelection) -> Self {
        self.backends = backends;
        self
    }

    /// Set the workload seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the per-operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the run timeout. `Duration::MAX` disables it.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the report path.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = path.into();
        self
    }

    /// Set the iterations per run.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the cooperative pool capacity.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the pooled-thread worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the fatal-failure threshold.
    pub fn with_fatal_threshold(mut self, threshold: f64) -> Self {
        self.fatal_threshold = threshold;
        self
    }

    /// Set the client plan policy.
    pub fn with_plan_policy(mut self, policy: PlanPolicy) -> Self {
        self.plan_policy = policy;
        self
    }

    /// Set the mixed workload ratio.
    pub fn with_mix(mut self, mix: MixRatio) -> Self {
        self.mix = mix;
        self
    }

    /// Set the backing store.
    pub fn with_store(mut self, store: StoreKind) -> Self {
        self.store = store;
        self
    }

    /// Set the simulated memory store round trip.
    pub fn with_io_latency(mut self, latency: Duration) -> Self {
        self.io_latency = latency;
        self
    }

    /// Set the fixture table sizes.
    pub fn with_fixture(mut self, fixture: FixtureSpec) -> Self {
        self.fixture = fixture;
        self
    }

    /// Reject configurations no run could be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.counts.is_empty() {
            return Err(ConfigError::EmptyList("operation counts"));
        }
        if self.counts.contains(&0) {
            return Err(ConfigError::ZeroOperationCount);
        }
        if self.concurrency.is_empty() {
            return Err(ConfigError::EmptyList("concurrency levels"));
        }
        if self.concurrency.contains(&0) {
            return Err(ConfigError::NonPositiveConcurrency);
        }
        if self.workloads.is_empty() {
            return Err(ConfigError::EmptyList("workloads"));
        }
        for (name, value) in [
            ("iterations", self.iterations),
            ("pool size", self.pool_size),
            ("workers", self.workers),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive(name));
            }
        }
        if self.op_timeout.is_zero() {
            return Err(ConfigError::NotPositive("operation timeout"));
        }
        if !(0.0..=1.0).contains(&self.fatal_threshold) {
            return Err(ConfigError::InvalidThreshold(self.fatal_threshold));
        }
        self.mix.validate()?;
        Ok(())
    }

    /// Settings handed to the simulator.
    pub fn simulator_config(&self) -> SimulatorConfig {
        let options = BackendOptions::default()
            .with_pool_size(self.pool_size)
            .with_workers(self.workers)
            .with_op_timeout(self.op_timeout);
        SimulatorConfig::default()
            .with_options(options)
            .with_run_timeout(self.run_timeout)
            .with_fatal_threshold(self.fatal_threshold)
    }

    /// Settings for the memory store.
    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig::new(self.fixture).with_io_latency(self.io_latency)
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments for the benchmark.
#[derive(Parser, Debug)]
#[command(name = "dualbench")]
#[command(
    version,
    about = "Compare cooperative and thread-pool database access",
    long_about = None
)]
pub struct Args {
    /// Operation counts, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "10,50,100,500,1000")]
    pub counts: Vec<usize>,

    /// Concurrency levels, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,5")]
    pub concurrency: Vec<usize>,

    /// Workload kinds, comma separated.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "standard,mixed,complex,parallel"
    )]
    pub workloads: Vec<String>,

    /// Backends to run.
    #[arg(long, value_enum, default_value_t = BackendSelection::Both)]
    pub backend: BackendSelection,

    /// Workload seed.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Per-operation timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_OP_TIMEOUT.as_millis() as u64)]
    pub op_timeout_ms: u64,

    /// Run timeout in seconds. Set to 0 to disable.
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT.as_secs())]
    pub run_timeout_secs: u64,

    /// Report path.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Iterations per run.
    #[arg(long, default_value_t = 1)]
    pub iterations: usize,

    /// Cooperative connection pool capacity.
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Pooled-thread worker count.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Fraction of planned operations allowed to fail fatally before a run
    /// is aborted.
    #[arg(long, default_value_t = DEFAULT_FATAL_THRESHOLD)]
    pub fatal_threshold: f64,

    /// Client plan policy: replicate or divide.
    #[arg(long, default_value = "replicate")]
    pub plan_policy: String,

    /// Mixed workload ratio as insert:update:delete:read.
    #[arg(long, default_value = "1:1:1:1")]
    pub mix: String,

    /// Backing store.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// Simulated memory store round trip in microseconds.
    #[arg(long, default_value_t = DEFAULT_IO_LATENCY.as_micros() as u64)]
    pub io_latency_us: u64,

    /// Seeded user rows.
    #[arg(long, default_value_t = DEFAULT_FIXTURE_USERS)]
    pub fixture_users: usize,

    /// Seeded product rows.
    #[arg(long, default_value_t = DEFAULT_FIXTURE_PRODUCTS)]
    pub fixture_products: usize,
}

impl Args {
    /// Convert command-line arguments to a validated configuration.
    pub fn into_config(self) -> Result<BenchConfig, ConfigError> {
        let mut workloads = Vec::with_capacity(self.workloads.len());
        for name in &self.workloads {
            let kind: WorkloadKind = name.parse()?;
            if !workloads.contains(&kind) {
                workloads.push(kind);
            }
        }

        // A zero run timeout disables the deadline.
        let run_timeout = if self.run_timeout_secs == 0 {
            Duration::MAX
        } else {
            Duration::from_secs(self.run_timeout_secs)
        };

        let config = BenchConfig {
            counts: self.counts,
            concurrency: self.concurrency,
            workloads,
            backends: self.backend,
            seed: self.seed,
            op_timeout: Duration::from_millis(self.op_timeout_ms),
            run_timeout,
            output: self.output,
            iterations: self.iterations,
            pool_size: self.pool_size,
            workers: self.workers,
            fatal_threshold: self.fatal_threshold,
            plan_policy: self.plan_policy.parse()?,
            mix: self.mix.parse()?,
            store: self.store,
            io_latency: Duration::from_micros(self.io_latency_us),
            fixture: FixtureSpec::new(self.fixture_users, self.fixture_products),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<BenchConfig, ConfigError> {
        let mut argv = vec!["dualbench"];
        argv.extend_from_slice(args);
        Args::parse_from(argv).into_config()
    }

    #[test]
    fn test_default_config() {
        let config = BenchConfig::default();
        assert_eq!(config.counts, vec![10, 50, 100, 500, 1000]);
        assert_eq!(config.concurrency, vec![1, 5]);
        assert_eq!(config.workloads, WorkloadKind::ALL.to_vec());
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(config.pool_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_args_defaults_match_config() {
        let config = parse(&[]).unwrap();
        let defaults = BenchConfig::default();
        assert_eq!(config.counts, defaults.counts);
        assert_eq!(config.concurrency, defaults.concurrency);
        assert_eq!(config.workloads, defaults.workloads);
        assert_eq!(config.op_timeout, defaults.op_timeout);
        assert_eq!(config.run_timeout, defaults.run_timeout);
        assert_eq!(config.io_latency, defaults.io_latency);
        assert_eq!(config.fixture, defaults.fixture);
        assert_eq!(config.mix, MixRatio::default());
        assert_eq!(config.backends, BackendSelection::Both);
    }

    #[test]
    fn test_args_lists_and_options() {
        let config = parse(&[
            "--counts",
            "5,20",
            "--concurrency",
            "2",
            "--workloads",
            "mixed,standard,mixed",
            "--backend",
            "pooled",
            "--plan-policy",
            "divide",
            "--mix",
            "2:1:1:0",
            "--run-timeout-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(config.counts, vec![5, 20]);
        assert_eq!(config.concurrency, vec![2]);
        assert_eq!(config.workloads, vec![WorkloadKind::Mixed, WorkloadKind::Standard]);
        assert_eq!(config.backends.variants(), vec![BackendVariant::Pooled]);
        assert_eq!(config.plan_policy, PlanPolicy::Divide);
        assert_eq!(config.mix, MixRatio::new(2, 1, 1, 0));
        assert_eq!(config.run_timeout, Duration::MAX);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(matches!(
            parse(&["--concurrency", "1,0"]),
            Err(ConfigError::NonPositiveConcurrency)
        ));
    }

    #[test]
    fn test_zero_count_rejected() {
        assert!(matches!(
            parse(&["--counts", "0"]),
            Err(ConfigError::ZeroOperationCount)
        ));
    }

    #[test]
    fn test_unknown_workload_rejected() {
        let err = parse(&["--workloads", "standard,bulk"]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("bulk"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(matches!(
            parse(&["--fatal-threshold", "1.5"]),
            Err(ConfigError::InvalidThreshold(_))
        ));
        assert!(matches!(parse(&["--mix", "0:0:0:0"]), Err(ConfigError::Parse(_))));
        assert!(matches!(
            parse(&["--mix", "4000000000:1:1:1"]),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            parse(&["--workers", "0"]),
            Err(ConfigError::NotPositive("workers"))
        ));
        assert!(matches!(
            BenchConfig::new().with_workloads(Vec::new()).validate(),
            Err(ConfigError::EmptyList("workloads"))
        ));
    }

    #[test]
    fn test_simulator_config() {
        let config = BenchConfig::new()
            .with_pool_size(3)
            .with_workers(7)
            .with_op_timeout(Duration::from_millis(250))
            .with_fatal_threshold(0.25);
        let sim = config.simulator_config();
        assert_eq!(sim.options.pool_size, 3);
        assert_eq!(sim.options.workers, 7);
        assert_eq!(sim.options.op_timeout, Duration::from_millis(250));
        assert_eq!(sim.fatal_threshold, 0.25);
    }
}
