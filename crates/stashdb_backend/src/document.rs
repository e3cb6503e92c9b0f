//! In-memory document backend.

use crate::client::{BackendClient, BatchOutcome, ChangeStream, ConditionalWrite};
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::key::Key;
use crate::memory::{BackendStats, FaultInjector, MemoryTables};
use crate::operation::{OperationBatch, OperationKind};
use crate::value::Record;
use tracing::trace;

/// A document store with an unbounded bulk-write call and a change feed.
///
/// Creates and updates replace the whole document (upsert); operations
/// of any kind and repeated keys may share one call and are applied in
/// order.
#[derive(Debug, Default)]
pub struct DocumentBackend {
    config: BackendConfig,
    tables: MemoryTables,
    faults: FaultInjector,
    stats: BackendStats,
}

impl DocumentBackend {
    /// Creates an empty backend with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend with the given configuration.
    #[must_use]
    pub fn with_config(config: BackendConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Fault injection for tests.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Call counters.
    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.tables.len(collection)
    }

    /// Returns true if `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Writes a document directly, bypassing batching and fault injection.
    pub fn insert(&self, collection: &str, key: &Key, document: Record) {
        self.tables.put(collection, key, document);
    }
}

impl BackendClient for DocumentBackend {
    fn name(&self) -> &str {
        "document"
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn max_batch_items(&self) -> Option<usize> {
        None
    }

    fn scan_all(&self, table: &str) -> BackendResult<Vec<Record>> {
        self.stats.record_scan();
        if self.faults.scan_fails() {
            return Err(BackendError::transient("find timed out"));
        }
        Ok(self.tables.scan(table))
    }

    fn get_by_id(&self, table: &str, key: &Key) -> BackendResult<Option<Record>> {
        self.stats.record_get();
        if self.faults.get_fails() {
            return Err(BackendError::transient("find timed out"));
        }
        Ok(self.tables.get(table, key))
    }

    fn execute_batch(&self, table: &str, batch: &OperationBatch) -> BackendResult<BatchOutcome> {
        self.stats.record_batch(batch.len());
        if self.faults.batch_fails() {
            return Err(BackendError::transient("bulk write timed out"));
        }

        let accepted = batch.len() - self.faults.withheld(batch.len());
        let mut outcome = BatchOutcome::default();
        for (i, op) in batch.operations().iter().enumerate() {
            if i >= accepted {
                outcome.unprocessed.push(op.clone());
                continue;
            }
            match op.kind {
                OperationKind::Create | OperationKind::Update => {
                    self.tables.put(table, &op.key, op.fields.clone())
                }
                OperationKind::Delete => self.tables.remove(table, &op.key),
            }
            outcome.applied.push(op.key.clone());
        }
        trace!(table, applied = outcome.applied.len(), "bulk write executed");
        Ok(outcome)
    }

    fn conditional_update(&self, table: &str, key: &Key, write: &ConditionalWrite) -> BackendResult<i64> {
        self.stats.record_conditional_update();
        if self.faults.conflict_forced() {
            self.stats.record_version_conflict();
            return Err(BackendError::version_conflict(
                key.to_string(),
                write.expected_version,
                None,
            ));
        }
        self.tables
            .conditional_update(table, key, write)
            .inspect_err(|e| {
                if e.is_version_conflict() {
                    self.stats.record_version_conflict();
                }
            })
    }

    fn subscribe_to_changes(&self, table: &str) -> BackendResult<Option<ChangeStream>> {
        Ok(Some(self.tables.subscribe(table)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChangeKind;
    use crate::operation::Operation;
    use serde_json::json;

    fn key(value: &str) -> Key {
        Key::new("beans", "id", value)
    }

    fn doc(label: &str) -> Record {
        let mut record = Record::new();
        record.insert("label".into(), json!(label));
        record
    }

    #[test]
    fn mixed_batches_apply_in_order() {
        let backend = DocumentBackend::new();
        let batch = OperationBatch::from_operations(vec![
            Operation::create(key("a"), doc("one")),
            Operation::update(key("a"), doc("two")),
            Operation::create(key("b"), doc("b")),
            Operation::delete(key("b")),
        ]);
        let outcome = backend.execute_batch("beans", &batch).unwrap();
        assert_eq!(outcome.applied.len(), 4);

        let record = backend.get_by_id("beans", &key("a")).unwrap().unwrap();
        assert_eq!(record["label"], json!("two"));
        assert!(backend.get_by_id("beans", &key("b")).unwrap().is_none());
        assert_eq!(backend.max_batch_items(), None);
    }

    #[test]
    fn update_replaces_whole_document() {
        let backend = DocumentBackend::new();
        let mut full = doc("a");
        full.insert("extra".into(), json!(true));
        backend.insert("beans", &key("a"), full);

        let batch = OperationBatch::single_update(Operation::update(key("a"), doc("b")));
        backend.execute_batch("beans", &batch).unwrap();
        let record = backend.get_by_id("beans", &key("a")).unwrap().unwrap();
        assert!(!record.contains_key("extra"));
    }

    #[test]
    fn change_feed_reports_images() {
        let backend = DocumentBackend::new();
        let feed = backend.subscribe_to_changes("beans").unwrap().unwrap();
        backend.insert("beans", &key("a"), doc("a"));
        let batch = OperationBatch::from_operations(vec![Operation::delete(key("a"))]);
        backend.execute_batch("beans", &batch).unwrap();

        let insert = feed.try_recv().unwrap();
        assert_eq!(insert.kind, ChangeKind::Insert);
        assert!(insert.new_image.is_some());
        let remove = feed.try_recv().unwrap();
        assert_eq!(remove.kind, ChangeKind::Remove);
        assert_eq!(remove.old_image.unwrap()["label"], json!("a"));
    }
}
