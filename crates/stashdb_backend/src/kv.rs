//! In-memory key-value backend.

use crate::client::{BackendClient, BatchOutcome, ChangeStream, ConditionalWrite};
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::key::Key;
use crate::memory::{BackendStats, FaultInjector, MemoryTables};
use crate::operation::{OperationBatch, OperationKind};
use crate::packer::DEFAULT_BATCH_SIZE;
use crate::reserved::{is_attribute_name_appropriate, is_table_name_appropriate};
use crate::value::Record;
use std::collections::HashSet;
use tracing::trace;

/// A key-value store with the rules of a hosted item database.
///
/// - Batch calls take at most [`DEFAULT_BATCH_SIZE`] operations.
/// - A bulk call holds creates and deletes only, each key at most once.
/// - Updates set the given fields and keep the others.
/// - Table names, written field names and version columns must pass the
///   naming rules.
///
/// # Example
///
/// ```rust
/// use stashdb_backend::{BackendClient, Key, KeyValueBackend, Operation, OperationBatch, Record};
///
/// let backend = KeyValueBackend::new();
/// let key = Key::new("beans", "id", "1");
/// let batch = OperationBatch::from_operations(vec![Operation::create(key.clone(), Record::new())]);
///
/// let outcome = backend.execute_batch("beans", &batch).unwrap();
/// assert!(outcome.is_complete());
/// assert!(backend.get_by_id("beans", &key).unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct KeyValueBackend {
    config: BackendConfig,
    tables: MemoryTables,
    faults: FaultInjector,
    stats: BackendStats,
}

impl KeyValueBackend {
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

    /// Number of records in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.len(table)
    }

    /// Returns true if `table` holds no records.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Writes a record directly, bypassing batching and fault injection.
    pub fn insert(&self, table: &str, key: &Key, record: Record) {
        self.tables.put(table, key, record);
    }

    fn check_table(table: &str) -> BackendResult<()> {
        if is_table_name_appropriate(table) {
            Ok(())
        } else {
            Err(BackendError::constraint(format!(
                "inappropriate table name '{table}'"
            )))
        }
    }

    fn check_batch(batch: &OperationBatch) -> BackendResult<()> {
        if batch.len() > DEFAULT_BATCH_SIZE {
            return Err(BackendError::constraint(format!(
                "batch of {} items exceeds the limit of {DEFAULT_BATCH_SIZE}",
                batch.len()
            )));
        }
        if batch.len() > 1 && batch.operations().iter().any(|op| op.is_update()) {
            return Err(BackendError::constraint(
                "updates cannot be combined with other operations",
            ));
        }
        let mut seen = HashSet::with_capacity(batch.len());
        for op in batch.operations() {
            if let Some(field) = op.fields.keys().find(|f| !is_attribute_name_appropriate(f)) {
                return Err(BackendError::constraint(format!(
                    "inappropriate attribute name '{field}' in {}",
                    op.key
                )));
            }
            if !seen.insert(op.key.physical_value()) {
                return Err(BackendError::constraint(format!(
                    "duplicate key {} in one batch",
                    op.key
                )));
            }
        }
        Ok(())
    }
}

impl BackendClient for KeyValueBackend {
    fn name(&self) -> &str {
        "key-value"
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn max_batch_items(&self) -> Option<usize> {
        Some(DEFAULT_BATCH_SIZE)
    }

    fn scan_all(&self, table: &str) -> BackendResult<Vec<Record>> {
        Self::check_table(table)?;
        self.stats.record_scan();
        if self.faults.scan_fails() {
            return Err(BackendError::transient("scan timed out"));
        }
        Ok(self.tables.scan(table))
    }

    fn get_by_id(&self, table: &str, key: &Key) -> BackendResult<Option<Record>> {
        Self::check_table(table)?;
        self.stats.record_get();
        if self.faults.get_fails() {
            return Err(BackendError::transient("read timed out"));
        }
        Ok(self.tables.get(table, key))
    }

    fn execute_batch(&self, table: &str, batch: &OperationBatch) -> BackendResult<BatchOutcome> {
        Self::check_table(table)?;
        Self::check_batch(batch)?;
        self.stats.record_batch(batch.len());
        if self.faults.batch_fails() {
            return Err(BackendError::transient("batch write timed out"));
        }

        let withheld = self.faults.withheld(batch.len());
        let accepted = batch.len() - withheld;
        let mut outcome = BatchOutcome::default();
        for (i, op) in batch.operations().iter().enumerate() {
            if i >= accepted {
                outcome.unprocessed.push(op.clone());
                continue;
            }
            match op.kind {
                OperationKind::Create => self.tables.put(table, &op.key, op.fields.clone()),
                OperationKind::Update => self.tables.merge(table, &op.key, &op.fields),
                OperationKind::Delete => self.tables.remove(table, &op.key),
            }
            outcome.applied.push(op.key.clone());
        }
        trace!(
            table,
            applied = outcome.applied.len(),
            unprocessed = outcome.unprocessed.len(),
            "batch executed"
        );
        Ok(outcome)
    }

    fn conditional_update(&self, table: &str, key: &Key, write: &ConditionalWrite) -> BackendResult<i64> {
        Self::check_table(table)?;
        if !is_attribute_name_appropriate(&write.version_column) {
            return Err(BackendError::constraint(format!(
                "inappropriate version column '{}'",
                write.version_column
            )));
        }
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
        Self::check_table(table)?;
        Ok(Some(self.tables.subscribe(table)))
    }
}
