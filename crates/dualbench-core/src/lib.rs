//! DualBench Core - Benchmark engine for database access strategies.
//!
//! Compares a cooperative single-threaded async backend against a fixed pool
//! of blocking worker threads, replaying identical seeded workloads against
//! the same store and pairing the measurements into a comparison report.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod metrics;
pub mod report;
pub mod simulator;
pub mod store;
pub mod workload;

pub use backend::{BackendHandle, BackendOptions, BackendVariant, OperationFailure, OperationOutcome};
pub use catalog::{describe, AggregateShape, CostClass, OperationKind, OperationSpec, ParamValue, Table};
pub use error::{ErrorKind, FailureClass, ParseError, RunError, StoreError};
pub use metrics::{LatencyHistogram, LatencySummary, ThroughputSpread};
pub use report::{
    aggregate, pair_runs, percentage_difference, ComparisonRecord, ComparisonReport,
    ConcurrencySummary, EnvironmentInfo, ReportMetadata, Winner, WorkloadSummary,
};
pub use simulator::{AbortReason, RunPhase, RunResult, RunSpec, RunStatus, Simulator, SimulatorConfig};
pub use store::{Connector, FixtureSpec, MemoryConfig, MemoryConnector};
pub use workload::{MixRatio, PlanPolicy, WorkloadGenerator, WorkloadKind, WorkloadPlan};

#[cfg(feature = "postgres")]
pub use store::PgConnector;
