//! Error types for the up-to-date check
//!
//! Policy outcomes ("not up to date because ...") are never errors; they are
//! reported through [`crate::FailureReason`]. Errors here cover I/O,
//! persistence, malformed host data and cooperative cancellation.

use std::path::PathBuf;

/// Errors raised while computing state or running a check.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// Filesystem access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A copy operation was requested with invalid paths
    #[error("Invalid copy from {source_path} to {destination}: {reason}")]
    InvalidCopy {
        /// Copy source
        source_path: PathBuf,
        /// Copy destination
        destination: PathBuf,
        /// Why the pair was rejected
        reason: &'static str,
    },

    /// Persisted state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The caller lost interest in the check
    #[error("Operation was cancelled")]
    Cancelled,

    /// The project data pipeline stopped before producing a snapshot
    #[error("Project data source closed: {0}")]
    DataSourceClosed(String),

    /// The host supplied data the check cannot interpret
    #[error("Invalid project data: {0}")]
    InvalidProjectData(String),
}

impl CheckError {
    /// Whether this error represents cooperative cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for up-to-date check operations.
pub type CheckResult<T> = Result<T, CheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguished() {
        assert!(CheckError::Cancelled.is_cancellation());
        assert!(!CheckError::Persistence("disk full".into()).is_cancellation());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CheckError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
