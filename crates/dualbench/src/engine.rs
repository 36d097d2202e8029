//! Benchmark matrix orchestration.
//!
//! Runs execute strictly one after another. For every matrix cell each
//! selected backend gets its own run, cooperative first, against a fixture
//! reset by the simulator before each iteration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dualbench_core::report::DIFF_CONVENTION;
use dualbench_core::{
    pair_runs, ComparisonReport, Connector, EnvironmentInfo, MemoryConnector, ReportMetadata,
    RunResult, RunSpec, Simulator, WorkloadGenerator,
};

use crate::config::{BenchConfig, StoreKind};
use crate::error::{ConfigError, Error};

/// Executes the configured benchmark matrix against one store.
pub struct Engine<C: Connector> {
    simulator: Simulator<C>,
    generator: WorkloadGenerator,
    config: BenchConfig,
}

impl<C: Connector> Engine<C> {
    /// Create an engine. The configuration is validated first.
    pub fn new(connector: Arc<C>, config: BenchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            simulator: Simulator::new(connector, config.simulator_config()),
            generator: WorkloadGenerator::new(config.fixture, config.mix),
            config,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Matrix cells in execution order: workload, then count, then
    /// concurrency.
    pub fn specs(&self) -> Vec<RunSpec> {
        let mut specs = Vec::new();
        for &workload in &self.config.workloads {
            for &count in &self.config.counts {
                for &concurrency in &self.config.concurrency {
                    specs.push(
                        RunSpec::new(workload, count, concurrency)
                            .with_policy(self.config.plan_policy)
                            .with_seed(self.config.seed)
                            .with_iterations(self.config.iterations),
                    );
                }
            }
        }
        specs
    }

    /// Execute every run and assemble the report. A run that cannot be
    /// prepared is recorded as failed and the matrix continues.
    pub fn run(&self) -> ComparisonReport {
        let specs = self.specs();
        let variants = self.config.backends.variants();
        tracing::info!(
            cells = specs.len(),
            backends = variants.len(),
            store = self.simulator.connector().name(),
            "starting benchmark"
        );

        let mut runs: Vec<RunResult> = Vec::with_capacity(specs.len() * variants.len());
        for spec in &specs {
            for &variant in &variants {
                runs.push(self.simulator.run(variant, spec, &self.generator));
            }
        }

        let records = pair_runs(&runs);
        ComparisonReport::build(records, runs, self.metadata())
    }

    fn metadata(&self) -> ReportMetadata {
        ReportMetadata {
            timestamp: Utc::now(),
            environment: EnvironmentInfo::collect(),
            store: self.simulator.connector().name().to_string(),
            seed: self.config.seed,
            plan_policy: self.config.plan_policy,
            iterations: self.config.iterations,
            pool_size: self.config.pool_size,
            workers: self.config.workers,
            op_timeout_ms: self.config.op_timeout.as_millis() as u64,
            run_timeout_secs: if self.config.run_timeout == Duration::MAX {
                0
            } else {
                self.config.run_timeout.as_secs()
            },
            fatal_threshold: self.config.fatal_threshold,
            mix_ratio: self.generator.mix(),
            diff_convention: DIFF_CONVENTION.to_string(),
        }
    }
}

/// Result of a benchmark invocation whose report was written.
#[derive(Debug)]
pub struct BenchOutcome {
    pub report: ComparisonReport,
    pub output: PathBuf,
}

impl BenchOutcome {
    /// Process exit code: 1 if any run failed, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.report.has_failed_runs() {
            1
        } else {
            0
        }
    }
}

/// Run the benchmark against a caller-supplied connector and write the
/// report.
pub fn run_with_connector<C: Connector>(
    connector: Arc<C>,
    config: BenchConfig,
) -> Result<BenchOutcome, Error> {
    let output = config.output.clone();
    let report = Engine::new(connector, config)?.run();
    report.write_json(&output)?;
    tracing::info!(
        path = %output.display(),
        comparisons = report.comparisons.len(),
        runs = report.runs.len(),
        "report written"
    );
    Ok(BenchOutcome { report, output })
}

/// Run the benchmark against the configured store and write the report.
///
/// Configuration errors are raised before any run starts and leave no
/// report behind.
pub fn run_benchmark(config: BenchConfig) -> Result<BenchOutcome, Error> {
    config.validate()?;
    match config.store {
        StoreKind::Memory => {
            let connector = Arc::new(MemoryConnector::new(config.memory_config()));
            run_with_connector(connector, config)
        }
        StoreKind::Postgres => run_postgres(config),
    }
}

#[cfg(feature = "postgres")]
fn run_postgres(config: BenchConfig) -> Result<BenchOutcome, Error> {
    let connector = dualbench_core::PgConnector::from_env(config.fixture)
        .map_err(|_| ConfigError::MissingDatabaseUrl)?;
    run_with_connector(Arc::new(connector), config)
}

#[cfg(not(feature = "postgres"))]
fn run_postgres(_config: BenchConfig) -> Result<BenchOutcome, Error> {
    Err(ConfigError::PostgresUnavailable.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualbench_core::WorkloadKind;

    #[test]
    fn test_specs_follow_matrix_order() {
        let config = BenchConfig::new()
            .with_counts(vec![10, 50])
            .with_concurrency(vec![1, 5])
            .with_workloads(vec![WorkloadKind::Mixed, WorkloadKind::Standard]);
        let engine = Engine::new(Arc::new(MemoryConnector::default()), config).unwrap();
        let cells: Vec<_> = engine
            .specs()
            .iter()
            .map(|s| (s.workload, s.operation_count, s.concurrency))
            .collect();
        assert_eq!(cells.len(), 8);
        assert_eq!(cells[0], (WorkloadKind::Mixed, 10, 1));
        assert_eq!(cells[1], (WorkloadKind::Mixed, 10, 5));
        assert_eq!(cells[2], (WorkloadKind::Mixed, 50, 1));
        assert_eq!(cells[4], (WorkloadKind::Standard, 10, 1));
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let config = BenchConfig::new().with_concurrency(vec![0]);
        assert!(matches!(
            Engine::new(Arc::new(MemoryConnector::default()), config),
            Err(ConfigError::NonPositiveConcurrency)
        ));
    }

    #[test]
    fn test_disabled_run_timeout_recorded_as_zero() {
        let config = BenchConfig::new().with_run_timeout(Duration::MAX);
        let engine = Engine::new(Arc::new(MemoryConnector::default()), config).unwrap();
        assert_eq!(engine.metadata().run_timeout_secs, 0);

        let config = BenchConfig::new().with_run_timeout(Duration::from_secs(30));
        let engine = Engine::new(Arc::new(MemoryConnector::default()), config).unwrap();
        assert_eq!(engine.metadata().run_timeout_secs, 30);
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_postgres_store_requires_feature() {
        let err = run_benchmark(BenchConfig::new().with_store(StoreKind::Postgres)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
