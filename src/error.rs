//! Error types shared across the queue subsystems.
//!
//! Defines the error types that cross module boundaries:
//! - Executor failures reported back to the queue
//! - Snapshot persistence failures
//!
//! Queue and pool errors live next to their types in `scheduler`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by an executor for a single job attempt.
///
/// Every variant is treated as a retryable failure by the queue; the retry
/// budget decides whether the job runs again.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Invalid job config: {0}")]
    InvalidConfig(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Scrape failed: {0}")]
    Failed(String),
}

impl ExecutorError {
    /// Convenience constructor for ad hoc failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors that can occur while reading or writing queue snapshots.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::InvalidTarget {
            target: "ftp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid target 'ftp://x': unsupported scheme"
        );

        let err = ExecutorError::Status {
            status: 503,
            url: "https://example.com".to_string(),
        };
        assert!(err.to_string().contains("503"));

        assert_eq!(ExecutorError::failed("boom").to_string(), "Scrape failed: boom");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::io(
            "/tmp/jobs.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("jobs.json"));
        assert!(err.to_string().contains("denied"));
    }
}
