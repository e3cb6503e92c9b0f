//! Error types for stashdb core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store and replication operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The replication master could not be reached.
    #[error("transient error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// The requested object does not exist.
    #[error("object not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The caller passed an argument the store cannot work with.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// I/O error, e.g. when spawning a worker thread.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl StoreError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the failure is expected to go away on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}
