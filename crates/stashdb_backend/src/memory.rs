//! Shared machinery of the in-memory backends.
//!
//! Both in-memory backends keep their tables here, publish change
//! notifications to subscribers, count calls and consult a
//! [`FaultInjector`] so tests can simulate outages and partial acceptance.

use crate::client::{ChangeKind, ChangeNotification, ChangeStream, ConditionalWrite};
use crate::error::{BackendError, BackendResult};
use crate::key::Key;
use crate::value::{integer_field, FieldValue, Record};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};

/// Call counters of an in-memory backend.
///
/// All counters are atomic and can be read while calls are in progress.
#[derive(Debug, Default)]
pub struct BackendStats {
    batch_calls: AtomicU64,
    batch_items: AtomicU64,
    scans: AtomicU64,
    gets: AtomicU64,
    conditional_updates: AtomicU64,
    version_conflicts: AtomicU64,
}

impl BackendStats {
    pub(crate) fn record_batch(&self, items: usize) {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        self.batch_items.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conditional_update(&self) {
        self.conditional_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_version_conflict(&self) {
        self.version_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of batch calls, including failed ones.
    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batch_calls: self.batch_calls(),
            batch_items: self.batch_items.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            conditional_updates: self.conditional_updates.load(Ordering::Relaxed),
            version_conflicts: self.version_conflicts.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`BackendStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Batch calls.
    pub batch_calls: u64,
    /// Operations submitted across all batch calls.
    pub batch_items: u64,
    /// Full-table scans.
    pub scans: u64,
    /// Single-record reads.
    pub gets: u64,
    /// Conditional updates attempted.
    pub conditional_updates: u64,
    /// Conditional updates rejected with a version conflict.
    pub version_conflicts: u64,
}

/// Programmable failures for tests.
///
/// Each counter is consumed by the calls it affects.
#[derive(Debug, Default)]
pub struct FaultInjector {
    failing_batches: AtomicUsize,
    failing_scans: AtomicUsize,
    failing_gets: AtomicUsize,
    withheld_items: AtomicUsize,
    forced_conflicts: AtomicUsize,
}

impl FaultInjector {
    /// The next `calls` batch calls fail with a transient error.
    pub fn fail_batches(&self, calls: usize) {
        self.failing_batches.store(calls, Ordering::SeqCst);
    }

    /// The next `calls` scans fail with a transient error.
    pub fn fail_scans(&self, calls: usize) {
        self.failing_scans.store(calls, Ordering::SeqCst);
    }

    /// The next `calls` single-record reads fail with a transient error.
    pub fn fail_gets(&self, calls: usize) {
        self.failing_gets.store(calls, Ordering::SeqCst);
    }

    /// The next `items` submitted batch items are reported unprocessed.
    pub fn withhold_items(&self, items: usize) {
        self.withheld_items.store(items, Ordering::SeqCst);
    }

    /// The next `calls` conditional updates fail with a version conflict.
    pub fn force_conflicts(&self, calls: usize) {
        self.forced_conflicts.store(calls, Ordering::SeqCst);
    }

    /// Clears every pending fault.
    pub fn clear(&self) {
        for counter in [
            &self.failing_batches,
            &self.failing_scans,
            &self.failing_gets,
            &self.withheld_items,
            &self.forced_conflicts,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    pub(crate) fn batch_fails(&self) -> bool {
        consume(&self.failing_batches, 1) == 1
    }

    pub(crate) fn scan_fails(&self) -> bool {
        consume(&self.failing_scans, 1) == 1
    }

    pub(crate) fn get_fails(&self) -> bool {
        consume(&self.failing_gets, 1) == 1
    }

    pub(crate) fn conflict_forced(&self) -> bool {
        consume(&self.forced_conflicts, 1) == 1
    }

    /// How many of `items` submitted items to withhold.
    pub(crate) fn withheld(&self, items: usize) -> usize {
        consume(&self.withheld_items, items)
    }
}

/// Takes up to `wanted` from `counter`, returning what was taken.
fn consume(counter: &AtomicUsize, wanted: usize) -> usize {
    let mut taken = 0;
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |available| {
        taken = available.min(wanted);
        Some(available - taken)
    });
    taken
}

/// Tables keyed by physical key value, plus change subscribers.
#[derive(Debug, Default)]
pub(crate) struct MemoryTables {
    tables: RwLock<HashMap<String, BTreeMap<String, Record>>>,
    feeds: Mutex<HashMap<String, Vec<Sender<ChangeNotification>>>>,
}

impl MemoryTables {
    pub(crate) fn scan(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn get(&self, table: &str, key: &Key) -> Option<Record> {
        self.tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(&key.physical_value()).cloned())
    }

    pub(crate) fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Replaces the whole record.
    pub(crate) fn put(&self, table: &str, key: &Key, record: Record) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_owned()).or_default();
        let physical = key.physical_value();
        let old = rows.insert(physical.clone(), record.clone());
        self.publish(table, key, physical, Some(record), old);
    }

    /// Sets `fields` on the record, creating it if absent.
    pub(crate) fn merge(&self, table: &str, key: &Key, fields: &Record) {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_owned()).or_default();
        let physical = key.physical_value();
        let old = rows.get(&physical).cloned();
        let mut record = old.clone().unwrap_or_else(|| seed_record(key));
        record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        rows.insert(physical.clone(), record.clone());
        self.publish(table, key, physical, Some(record), old);
    }

    pub(crate) fn remove(&self, table: &str, key: &Key) {
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(table) else {
            return;
        };
        let physical = key.physical_value();
        if let Some(old) = rows.remove(&physical) {
            self.publish(table, key, physical, None, Some(old));
        }
    }

    /// Applies `write` when the stored version is absent, `null` or equal
    /// to the expected one, then increments the version.
    pub(crate) fn conditional_update(&self, table: &str, key: &Key, write: &ConditionalWrite) -> BackendResult<i64> {
        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_owned()).or_default();
        let physical = key.physical_value();
        let old = rows.get(&physical).cloned();

        let current = old
            .as_ref()
            .and_then(|record| integer_field(record, &write.version_column));
        if let Some(current) = current {
            if current != write.expected_version {
                return Err(BackendError::version_conflict(
                    key.to_string(),
                    write.expected_version,
                    Some(current),
                ));
            }
        }

        let version = current.unwrap_or(0) + 1;
        let mut record = old.clone().unwrap_or_else(|| seed_record(key));
        record.extend(write.writes.iter().map(|(k, v)| (k.clone(), v.clone())));
        record.insert(write.version_column.clone(), FieldValue::from(version));
        rows.insert(physical.clone(), record.clone());
        self.publish(table, key, physical, Some(record), old);
        Ok(version)
    }

    pub(crate) fn subscribe(&self, table: &str) -> ChangeStream {
        let (tx, rx) = mpsc::channel();
        self.feeds.lock().entry(table.to_owned()).or_default().push(tx);
        rx
    }

    fn publish(&self, table: &str, key: &Key, physical: String, new_image: Option<Record>, old_image: Option<Record>) {
        let mut feeds = self.feeds.lock();
        let Some(subscribers) = feeds.get_mut(table) else {
            return;
        };
        let kind = match (&new_image, &old_image) {
            (None, _) => ChangeKind::Remove,
            (Some(_), None) => ChangeKind::Insert,
            (Some(_), Some(_)) => ChangeKind::Modify,
        };
        let notification = ChangeNotification {
            kind,
            key: Key::new(table, key.column.clone(), physical),
            new_image,
            old_image,
        };
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }
}

/// A fresh record holding only the logical key.
fn seed_record(key: &Key) -> Record {
    let mut record = Record::new();
    record.insert(key.column.clone(), FieldValue::from(key.value.clone()));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(value: &str) -> Key {
        Key::new("beans", "id", value)
    }

    fn fields(count: i64) -> Record {
        let mut record = Record::new();
        record.insert("count".into(), json!(count));
        record
    }

    #[test]
    fn consume_takes_what_is_available() {
        let counter = AtomicUsize::new(3);
        assert_eq!(consume(&counter, 2), 2);
        assert_eq!(consume(&counter, 2), 1);
        assert_eq!(consume(&counter, 2), 0);
    }

    #[test]
    fn notifications_follow_mutations() {
        let tables = MemoryTables::default();
        let feed = tables.subscribe("beans");

        tables.put("beans", &key("a"), fields(1));
        tables.merge("beans", &key("a"), &fields(2));
        tables.remove("beans", &key("a"));
        tables.remove("beans", &key("a"));

        let kinds: Vec<_> = feed.try_iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Modify, ChangeKind::Remove]
        );
    }

    #[test]
    fn long_keys_are_stored_hashed() {
        let tables = MemoryTables::default();
        let feed = tables.subscribe("beans");
        let long = key(&"k".repeat(300));

        tables.put("beans", &long, fields(1));
        assert!(tables.get("beans", &long).is_some());

        let notification = feed.try_recv().unwrap();
        assert_eq!(notification.key.value, long.physical_value());
        assert!(tables
            .get("beans", &notification.key)
            .is_some());
    }

    #[test]
    fn merge_creates_with_key_column() {
        let tables = MemoryTables::default();
        tables.merge("beans", &key("a"), &fields(5));
        let record = tables.get("beans", &key("a")).unwrap();
        assert_eq!(record["id"], json!("a"));
        assert_eq!(record["count"], json!(5));
    }

    #[test]
    fn conditional_update_versions() {
        let tables = MemoryTables::default();
        let write = |expected| ConditionalWrite {
            version_column: "generation".into(),
            expected_version: expected,
            writes: fields(expected),
        };

        assert_eq!(tables.conditional_update("beans", &key("a"), &write(7)).unwrap(), 1);
        assert_eq!(tables.conditional_update("beans", &key("a"), &write(1)).unwrap(), 2);

        let err = tables
            .conditional_update("beans", &key("a"), &write(1))
            .unwrap_err();
        assert!(err.is_version_conflict());
        let record = tables.get("beans", &key("a")).unwrap();
        assert_eq!(record["generation"], json!(2));
        assert_eq!(record["count"], json!(1));
    }

    #[test]
    fn null_version_matches() {
        let tables = MemoryTables::default();
        let mut record = fields(0);
        record.insert("generation".into(), FieldValue::Null);
        tables.put("beans", &key("a"), record);

        let write = ConditionalWrite {
            version_column: "generation".into(),
            expected_version: 42,
            writes: fields(9),
        };
        assert_eq!(tables.conditional_update("beans", &key("a"), &write).unwrap(), 1);
    }
}
