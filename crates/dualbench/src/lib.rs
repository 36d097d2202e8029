//! DualBench - cooperative vs thread-pool database access benchmark.
//!
//! This crate wires command-line configuration to the benchmark engine in
//! `dualbench-core` and writes the comparison report.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{Args, BackendSelection, BenchConfig, StoreKind};
pub use engine::{run_benchmark, run_with_connector, BenchOutcome, Engine};
pub use error::{ConfigError, Error};
