//! Backend client abstraction.

use crate::config::BackendConfig;
use crate::error::BackendResult;
use crate::key::Key;
use crate::operation::{Operation, OperationBatch};
use crate::value::Record;
use std::sync::mpsc::Receiver;

/// Result of one batch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Keys of the operations the backend applied.
    pub applied: Vec<Key>,
    /// Operations the backend did not accept and that may be resubmitted.
    pub unprocessed: Vec<Operation>,
}

impl BatchOutcome {
    /// Returns true if every operation was applied.
    pub fn is_complete(&self) -> bool {
        self.unprocessed.is_empty()
    }
}

/// A versioned conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalWrite {
    /// Column holding the version counter.
    pub version_column: String,
    /// Version the stored record must carry (absent and `null` also match).
    pub expected_version: i64,
    /// Fields to set when the condition holds.
    pub writes: Record,
}

/// Kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A record was created.
    Insert,
    /// A record was replaced or modified.
    Modify,
    /// A record was removed.
    Remove,
}

/// A change published by the backend.
///
/// `key.value` is the physical key value, hashed for long logical ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    /// What happened.
    pub kind: ChangeKind,
    /// The affected key.
    pub key: Key,
    /// Record after the change, if the backend publishes it.
    pub new_image: Option<Record>,
    /// Record before the change, if the backend publishes it.
    pub old_image: Option<Record>,
}

/// Stream of change notifications for one table.
pub type ChangeStream = Receiver<ChangeNotification>;

/// The capability set every backend provides.
///
/// Implementations must be `Send + Sync`: a sync engine calls them from its
/// flush thread and its watch thread.
pub trait BackendClient: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// The configuration the client was built with.
    fn config(&self) -> &BackendConfig;

    /// Maximum operations per batch call, if the backend caps it.
    fn max_batch_items(&self) -> Option<usize>;

    /// Reads every record of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::Transient`] if the backend is unreachable.
    fn scan_all(&self, table: &str) -> BackendResult<Vec<Record>>;

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::Transient`] if the backend is unreachable.
    fn get_by_id(&self, table: &str, key: &Key) -> BackendResult<Option<Record>>;

    /// Executes one batch.
    ///
    /// Partial acceptance is reported through [`BatchOutcome::unprocessed`],
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::ConstraintViolation`] for batches the
    /// backend cannot accept at all and
    /// [`crate::BackendError::Transient`] if nothing could be written.
    fn execute_batch(&self, table: &str, batch: &OperationBatch) -> BackendResult<BatchOutcome>;

    /// Applies `write` if the stored version matches, returning the new version.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::VersionConflict`] if the condition fails.
    fn conditional_update(&self, table: &str, key: &Key, write: &ConditionalWrite) -> BackendResult<i64>;

    /// Subscribes to changes of `table`; `None` if the backend has no change feed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::BackendError::Transient`] if the feed cannot be opened.
    fn subscribe_to_changes(&self, _table: &str) -> BackendResult<Option<ChangeStream>> {
        Ok(None)
    }
}
