//! Error types for the sync engine.

use stashdb_backend::BackendError;
use stashdb_core::StoreError;
use std::io;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while loading, flushing, watching or replaying.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The backend refused or failed a call.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The in-memory store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A crash dump could not be written or read.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A crash dump holds malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An object could not be mapped to or from a record.
    #[error("codec error: {0}")]
    Codec(String),

    /// The engine has already been started.
    #[error("sync engine already started")]
    AlreadyStarted,

    /// The engine has been closed.
    #[error("sync engine stopped")]
    Stopped,
}

impl SyncError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Returns true if the failed call may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            Self::Store(e) => e.is_transient(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(BackendError::transient("down")).is_retryable());
        assert!(!SyncError::from(BackendError::constraint("reserved")).is_retryable());
        assert!(!SyncError::codec("missing field").is_retryable());
        assert!(!SyncError::Stopped.is_retryable());
    }

    #[test]
    fn display() {
        assert_eq!(
            SyncError::codec("bad modified").to_string(),
            "codec error: bad modified"
        );
    }
}
