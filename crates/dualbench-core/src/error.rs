//! Core error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a failed operation may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Connection drop or timeout. Eligible for one bounded retry.
    Transient,
    /// Constraint violation or malformed operation. Never retried.
    Fatal,
}

/// Classified kind of a store failure, as recorded in run results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    ConnectionReset,
    Timeout,
    ConstraintViolation,
    MalformedOperation,
}

impl ErrorKind {
    /// Retry class for this kind.
    pub fn class(self) -> FailureClass {
        match self {
            ErrorKind::Connect | ErrorKind::ConnectionReset | ErrorKind::Timeout => {
                FailureClass::Transient
            }
            ErrorKind::ConstraintViolation | ErrorKind::MalformedOperation => FailureClass::Fatal,
        }
    }
}

/// Errors raised by a store connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Could not establish a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Established connection was dropped mid-operation.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Operation exceeded its per-operation timeout.
    #[error("operation timed out")]
    Timeout,

    /// Unique or foreign-key constraint rejected a write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Operation parameters could not be interpreted.
    #[error("malformed operation: {0}")]
    MalformedOperation(String),
}

impl StoreError {
    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connect(_) => ErrorKind::Connect,
            StoreError::ConnectionReset(_) => ErrorKind::ConnectionReset,
            StoreError::Timeout => ErrorKind::Timeout,
            StoreError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            StoreError::MalformedOperation(_) => ErrorKind::MalformedOperation,
        }
    }

    /// Retry class of this error.
    pub fn classify(&self) -> FailureClass {
        self.kind().class()
    }

    /// Check if this error is eligible for retry.
    pub fn is_transient(&self) -> bool {
        self.classify() == FailureClass::Transient
    }
}

/// Error parsing a textual configuration value into a core type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Value does not name a known variant.
    #[error("unknown {what}: {value}")]
    Unknown { what: &'static str, value: String },

    /// Value has the right shape but is out of range or inconsistent.
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

/// Error preparing an iteration of a run. The simulator records it on the
/// run result and marks the run failed.
#[derive(Debug, Error)]
pub enum RunError {
    /// The fixture could not be restored before an iteration.
    #[error("fixture reset failed: {0}")]
    Fixture(#[from] StoreError),

    /// The run's runtime could not be created.
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(StoreError::Timeout.classify(), FailureClass::Transient);
        assert_eq!(
            StoreError::ConnectionReset("peer closed".into()).classify(),
            FailureClass::Transient
        );
        assert_eq!(
            StoreError::ConstraintViolation("users_username_key".into()).classify(),
            FailureClass::Fatal
        );
        assert_eq!(
            StoreError::MalformedOperation("missing id".into()).classify(),
            FailureClass::Fatal
        );
        assert!(StoreError::Connect("refused".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::ConstraintViolation("duplicate username".into());
        assert_eq!(err.to_string(), "constraint violation: duplicate username");
        let err = ParseError::Unknown {
            what: "workload kind",
            value: "bogus".into(),
        };
        assert_eq!(err.to_string(), "unknown workload kind: bogus");
    }
}
