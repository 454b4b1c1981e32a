//! Error types for pgkit.

use thiserror::Error;

use crate::driver::DriverError;

/// The unified error type returned by every pgkit operation.
///
/// Driver failures are always wrapped in [`PgKitError::Driver`], whether or not the
/// executor already retried them.
#[derive(Debug, Error)]
pub enum PgKitError {
    /// The database or the connection reported a failure.
    #[error("Database error: {0}")]
    Driver(#[from] DriverError),

    /// A caller-supplied schema does not line up with the returned columns.
    #[error("Schema mismatch at column {column}: {message}")]
    SchemaMismatch { column: usize, message: String },

    /// A list of plain records does not share one field set.
    #[error("Record {row} has fields {found:?}, expected {expected:?}; wrap heterogeneous records in Values")]
    HeterogeneousParameters {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// Parameters that cannot form a valid statement.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// A materialized record could not be deserialized into the requested type.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgKitError {
    /// Create a schema mismatch error for the given column position.
    pub fn mismatch(column: usize, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            column,
            message: message.into(),
        }
    }

    /// Whether the underlying cause was a connection-level failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Driver(e) if e.is_transient())
    }
}

impl serde::ser::Error for PgKitError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::InvalidParameters(msg.to_string())
    }
}

/// Result type alias for pgkit operations.
pub type PgKitResult<T> = Result<T, PgKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PgKitError::mismatch(2, "expected integer, got text");
        assert_eq!(
            err.to_string(),
            "Schema mismatch at column 2: expected integer, got text"
        );
    }

    #[test]
    fn test_transient_passthrough() {
        let err: PgKitError = DriverError::transient("connection reset").into();
        assert!(err.is_transient());

        let err: PgKitError = DriverError::statement("duplicate key").into();
        assert!(!err.is_transient());
    }
}
