//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by backend clients and the helpers built on them.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested key does not exist.
    #[error("record not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// An optimistic-concurrency condition failed.
    #[error("version conflict on {key}: expected {expected}, found {actual:?}")]
    VersionConflict {
        /// The key being updated.
        key: String,
        /// Version the writer expected.
        expected: i64,
        /// Version actually stored, if any.
        actual: Option<i64>,
    },

    /// The backend could not be reached or timed out.
    #[error("transient backend error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Part of a batch was not accepted.
    #[error("{count} batch items left unprocessed")]
    UnprocessedItems {
        /// Number of operations still unprocessed.
        count: usize,
    },

    /// The call violates a backend naming, key or batch rule.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated rule.
        message: String,
    },

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BackendError {
    /// Creates a not found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a constraint violation.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a version conflict.
    pub fn version_conflict(key: impl Into<String>, expected: i64, actual: Option<i64>) -> Self {
        Self::VersionConflict {
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Returns true for backend outages and timeouts.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Io(_))
    }

    /// Returns true for optimistic-concurrency failures.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Returns true if repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Self::UnprocessedItems { .. })
    }
}
