//! Benchmark error types.

use dualbench_core::ParseError;
use thiserror::Error;

/// Invalid benchmark configuration. Raised before any run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A list option was given no values.
    #[error("{0} must not be empty")]
    EmptyList(&'static str),

    /// An operation count of zero was requested.
    #[error("operation counts must be positive")]
    ZeroOperationCount,

    /// A concurrency level of zero was requested.
    #[error("concurrency levels must be positive")]
    NonPositiveConcurrency,

    /// A sizing option that must be positive was zero.
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    /// Fatal-failure threshold outside [0, 1].
    #[error("fatal threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),

    /// A value could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The PostgreSQL store was selected without a connection URL.
    #[error("DATABASE_URL must be set to use the postgres store")]
    MissingDatabaseUrl,

    /// The PostgreSQL store was selected but not compiled in.
    #[error("postgres store requires building with the `postgres` feature")]
    PostgresUnavailable,
}

/// Benchmark errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            _ => 1,
        }
    }
}
