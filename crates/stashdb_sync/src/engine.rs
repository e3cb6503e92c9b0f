//! Write-behind persistence of a [`VersionedStore`].
//!
//! A [`SyncEngine`] loads a backend table into a store, then periodically
//! drains the entries modified since the last flush and writes them back.
//! Sub-batches the backend rejects are written to crash dumps instead of
//! being lost. With watching enabled, backend changes flow back into the
//! store.
//!
//! Flushes and notification handling share one lock, so a flush never
//! observes a half-applied refresh.

use crate::codec::RecordCodec;
use crate::config::PersistenceConfig;
use crate::crash_dump::CrashDumper;
use crate::error::{SyncError, SyncResult};
use crate::state::{EngineState, FlushReport, SyncStats, SyncStatsSnapshot};
use crate::watch::Watcher;
use parking_lot::{Mutex, RwLock};
use stashdb_backend::{
    string_field, BackendClient, BatchPacker, BatchWriter, ChangeKind, ChangeNotification, Key, Operation,
    OperationState, Record,
};
use stashdb_core::{IdObject, Metadata, Scheduled, StoredObject, VersionedStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Keeps a store and a backend table in sync.
///
/// Dropping a running engine closes it, which runs a final flush.
pub struct SyncEngine<T: StoredObject> {
    inner: Arc<EngineInner<T>>,
    timer: Mutex<Option<Scheduled>>,
    watcher: Mutex<Option<Watcher>>,
}

struct EngineInner<T: StoredObject> {
    store: Arc<VersionedStore<T>>,
    client: Arc<dyn BackendClient>,
    codec: Arc<dyn RecordCodec<T>>,
    config: PersistenceConfig,
    writer: BatchWriter,
    dumper: CrashDumper,
    /// Last flush watermark; also the lock serializing flushes and refreshes.
    watermark: Mutex<i64>,
    state: RwLock<EngineState>,
    stopped: AtomicBool,
    stats: SyncStats,
}

/// A drained entry turned into a backend operation.
struct Drained {
    operation: Operation,
    id: String,
    /// `modified` of the tombstone behind a delete.
    tombstone: Option<i64>,
}

impl<T: StoredObject> SyncEngine<T> {
    /// Creates an idle engine.
    pub fn new(
        store: Arc<VersionedStore<T>>,
        client: Arc<dyn BackendClient>,
        codec: impl RecordCodec<T> + 'static,
        config: PersistenceConfig,
    ) -> Self {
        let retry = config.unprocessed_retry.clone();
        let writer = BatchWriter::new(Arc::clone(&client), config.table.clone())
            .with_max_resubmits(retry.max_attempts)
            .with_backoff(move |attempt| retry.delay_for_attempt(attempt));
        let dumper = CrashDumper::new(&config.crash_dump_dir, &config.table);

        Self {
            inner: Arc::new(EngineInner {
                store,
                client,
                codec: Arc::new(codec),
                config,
                writer,
                dumper,
                watermark: Mutex::new(-1),
                state: RwLock::new(EngineState::Idle),
                stopped: AtomicBool::new(false),
                stats: SyncStats::new(),
            }),
            timer: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// The synchronized store.
    pub fn store(&self) -> &Arc<VersionedStore<T>> {
        &self.inner.store
    }

    /// The engine configuration.
    pub fn config(&self) -> &PersistenceConfig {
        &self.inner.config
    }

    /// The lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.read()
    }

    /// Timestamp up to which changes have been flushed.
    pub fn watermark(&self) -> i64 {
        *self.inner.watermark.lock()
    }

    /// Directory crash dumps of this table are written to.
    pub fn crash_dump_dir(&self) -> &std::path::Path {
        self.inner.dumper.dir()
    }

    /// Counters of this engine.
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Loads the table, then starts the flush timer and, if configured, the
    /// change-feed watcher. Returns the number of records loaded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyStarted`] or [`SyncError::Stopped`] for an
    /// engine that is not idle, and the backend error if the table cannot be
    /// read.
    pub fn start(&self) -> SyncResult<usize> {
        match self.state() {
            EngineState::Running => return Err(SyncError::AlreadyStarted),
            EngineState::Stopped => return Err(SyncError::Stopped),
            EngineState::Idle => {}
        }

        let loaded = self.inner.load()?;
        let table = &self.inner.config.table;
        let stream = if self.inner.config.watch {
            let stream = self.inner.client.subscribe_to_changes(table)?;
            if stream.is_none() {
                warn!(
                    table = %table,
                    backend = self.inner.client.name(),
                    "backend has no change feed, watching disabled"
                );
            }
            stream
        } else {
            None
        };

        let inner = Arc::clone(&self.inner);
        let delay = self.inner.config.flush_delay;
        let timer = Scheduled::with_fixed_delay(format!("stashdb-flush-{table}"), delay, delay, move || {
            if inner.stopped.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = inner.flush() {
                inner.stats.record_error();
                error!(table = %inner.config.table, error = %e, "flush cycle failed");
            }
        })?;
        *self.timer.lock() = Some(timer);

        if let Some(stream) = stream {
            let inner = Arc::clone(&self.inner);
            let watcher = Watcher::spawn(
                format!("stashdb-watch-{table}"),
                stream,
                self.inner.config.watch_poll_interval,
                move |notification| inner.on_notification(notification),
            )?;
            *self.watcher.lock() = Some(watcher);
        }

        *self.inner.state.write() = EngineState::Running;
        info!(table = %table, loaded, watch = self.watcher.lock().is_some(), "sync engine started");
        Ok(loaded)
    }

    /// Runs one flush cycle now.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] after [`close`](Self::close). Backend
    /// failures are not errors of the cycle; they end up in crash dumps.
    pub fn flush(&self) -> SyncResult<FlushReport> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(SyncError::Stopped);
        }
        self.inner.flush()
    }

    /// Re-reads `id` from the backend and applies it if strictly newer.
    ///
    /// Returns true if the store changed.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the read or a codec error.
    pub fn refresh_by_id(&self, id: &str) -> SyncResult<bool> {
        let _guard = self.inner.watermark.lock();
        self.inner.refresh_by_id(id)
    }

    /// Stops the timer, runs a final flush, then stops the watcher.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if already closed.
    pub fn close(&self) -> SyncResult<FlushReport> {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return Err(SyncError::Stopped);
        }

        if let Some(mut timer) = self.timer.lock().take() {
            timer.cancel();
        }
        let report = self.inner.flush();
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        *self.inner.state.write() = EngineState::Stopped;

        info!(table = %self.inner.config.table, "sync engine stopped");
        report
    }
}

impl<T: StoredObject> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        if self.inner.stopped.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.close() {
            error!(table = %self.inner.config.table, error = %e, "final flush failed");
        }
    }
}

impl<T: StoredObject> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("table", &self.inner.config.table)
            .field("backend", &self.inner.client.name())
            .field("state", &self.state())
            .finish()
    }
}

impl<T: StoredObject> EngineInner<T> {
    fn table(&self) -> &str {
        &self.config.table
    }

    fn key(&self, id: &str) -> Key {
        Key::new(self.table(), self.config.key_column.clone(), id)
    }

    // ========================================================================
    // Load
    // ========================================================================

    fn load(&self) -> SyncResult<usize> {
        let mut watermark = self.watermark.lock();
        let was_empty = self.store.entry_count() == 0;

        let records = self.client.scan_all(self.table())?;
        let scanned = records.len();
        let mut entries = Vec::with_capacity(scanned);
        for record in &records {
            match self.codec.from_record(record) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(table = %self.table(), error = %e, "skipping undecodable record"),
            }
        }

        let newest = entries.iter().map(|entry| entry.modified).max();
        let loaded = self.store.load(entries);
        if was_empty {
            if let Some(newest) = newest {
                *watermark = (*watermark).max(newest);
            }
        }

        self.stats.record_load(loaded);
        info!(table = %self.table(), scanned, loaded, "table loaded");
        Ok(loaded)
    }

    // ========================================================================
    // Flush
    // ========================================================================

    fn flush(&self) -> SyncResult<FlushReport> {
        let mut watermark = self.watermark.lock();
        let (now, dirty) = self.store.drain_since(*watermark);
        trace!(table = %self.table(), watermark = *watermark, dirty = dirty.len(), "flush cycle");

        let mut report = FlushReport {
            drained: dirty.len(),
            ..FlushReport::default()
        };
        let batch_size = self.config.batch_size.max(1);
        let mut pending = Vec::new();
        for (id, metadata) in dirty {
            match self.drain(id, &metadata) {
                Ok(drained) => pending.push(drained),
                Err(e) => {
                    report.failed += 1;
                    error!(table = %self.table(), error = %e, "cannot encode entry, skipped");
                }
            }
            if pending.len() >= batch_size {
                self.persist(std::mem::take(&mut pending), &mut report);
            }
        }
        if !pending.is_empty() {
            self.persist(pending, &mut report);
        }

        *watermark = now;
        report.watermark = now;
        self.stats.record_flush(&report);
        if !report.is_empty() {
            debug!(
                table = %self.table(),
                drained = report.drained,
                persisted = report.persisted,
                failed = report.failed,
                watermark = now,
                "flush complete"
            );
        }
        Ok(report)
    }

    fn drain(&self, id: String, metadata: &Metadata<T>) -> SyncResult<Drained> {
        let key = self.key(&id);
        if metadata.is_deleted() {
            return Ok(Drained {
                operation: Operation::delete(key),
                id,
                tombstone: Some(metadata.modified),
            });
        }

        let mut record = self.codec.to_record(metadata)?;
        record.insert(self.config.key_column.clone(), id.clone().into());
        Ok(Drained {
            operation: Operation::update(key, record),
            id,
            tombstone: None,
        })
    }

    /// Writes one sub-batch; whatever is not applied goes to a crash dump.
    fn persist(&self, drained: Vec<Drained>, report: &mut FlushReport) {
        let mut tombstones: HashMap<Key, (String, i64)> = HashMap::new();
        let mut operations = Vec::with_capacity(drained.len());
        for entry in drained {
            if let Some(modified) = entry.tombstone {
                tombstones.insert(entry.operation.key.clone(), (entry.id, modified));
            }
            operations.push(entry.operation);
        }

        let cap = self.config.batch_size.max(1);
        let cap = self.client.max_batch_items().map_or(cap, |max| max.min(cap));
        let mut batches = BatchPacker::pack(operations, cap);
        if let Err(e) = self.writer.write_all(&mut batches) {
            self.stats.record_error();
            error!(table = %self.table(), error = %e, "persisting sub-batch failed");
        }

        let mut unpersisted = Vec::new();
        for operation in batches.into_iter().flat_map(|batch| batch.into_operations()) {
            if operation.state != OperationState::Success {
                unpersisted.push(operation);
                continue;
            }
            report.persisted += 1;
            if let Some((id, modified)) = tombstones.get(&operation.key) {
                if self.remove_tombstone(id, *modified) {
                    report.removed_tombstones += 1;
                }
            }
        }

        if unpersisted.is_empty() {
            return;
        }
        report.failed += unpersisted.len();
        match self.dumper.dump(&unpersisted) {
            Ok(path) => {
                error!(
                    table = %self.table(),
                    operations = unpersisted.len(),
                    path = %path.display(),
                    "unpersisted operations written to crash dump"
                );
                report.dumps.push(path);
            }
            Err(e) => {
                self.stats.record_error();
                error!(
                    table = %self.table(),
                    operations = unpersisted.len(),
                    error = %e,
                    "crash dump failed, operations lost"
                );
            }
        }
    }

    /// Drops the tombstone unless the id was written again meanwhile.
    fn remove_tombstone(&self, id: &str, modified: i64) -> bool {
        self.store.id_lock().synchronized_on(id, || {
            let unchanged = self
                .store
                .metadata(id)
                .is_some_and(|current| current.is_deleted() && current.modified == modified);
            if unchanged {
                self.store.remove_permanently(id);
            }
            unchanged
        })
    }

    // ========================================================================
    // Watch
    // ========================================================================

    fn on_notification(&self, notification: ChangeNotification) {
        let _guard = self.watermark.lock();
        self.stats.record_notification();
        if let Err(e) = self.apply_notification(notification) {
            self.stats.record_error();
            error!(table = %self.table(), error = %e, "change notification not applied");
        }
    }

    fn apply_notification(&self, notification: ChangeNotification) -> SyncResult<()> {
        let ChangeNotification {
            kind,
            key,
            new_image,
            old_image,
        } = notification;

        match kind {
            ChangeKind::Remove => {
                let id = self.logical_id(old_image.as_ref(), &key);
                self.remove_local(&id);
            }
            ChangeKind::Insert | ChangeKind::Modify => {
                let id = self.logical_id(new_image.as_ref(), &key);
                self.refresh_by_id(&id)?;
            }
        }
        Ok(())
    }

    /// Id from the image's key column, else the (possibly hashed) key value.
    fn logical_id(&self, image: Option<&Record>, key: &Key) -> String {
        image
            .and_then(|record| string_field(record, &self.config.key_column))
            .map(str::to_owned)
            .unwrap_or_else(|| key.value.clone())
    }

    fn remove_local(&self, id: &str) {
        let removed = self.store.id_lock().synchronized_on(id, || {
            let removed = self.store.remove_permanently(id)?;
            let object = (!removed.is_deleted()).then(|| removed.object.clone());
            if let Some(object) = &object {
                self.store.fire_deleted(vec![IdObject::new(id, object.clone())]);
            }
            object
        });
        if removed.is_some() {
            debug!(table = %self.table(), id = %id, "removed after backend delete");
        }
    }

    fn refresh_by_id(&self, id: &str) -> SyncResult<bool> {
        let Some(record) = self.client.get_by_id(self.table(), &self.key(id))? else {
            trace!(table = %self.table(), id = %id, "refresh target no longer exists");
            return Ok(false);
        };
        let fresh = self.codec.from_record(&record)?;
        Ok(self.apply_if_newer(id, fresh))
    }

    fn apply_if_newer(&self, id: &str, fresh: Metadata<T>) -> bool {
        let store = &self.store;
        store.id_lock().synchronized_on(id, || {
            if let Some(local) = store.metadata(id) {
                if fresh.modified <= local.modified {
                    trace!(table = %self.table(), id = %id, "local entry is as new, refresh skipped");
                    return false;
                }
            }

            store.clock().observe(fresh.modified);
            let object = fresh.object.clone();
            let deleted = fresh.is_deleted();
            let added = store.put_metadata(id, fresh);
            if !deleted {
                let changed = vec![IdObject::new(id, object)];
                if added {
                    store.fire_added(changed);
                } else {
                    store.fire_updated(changed);
                }
            }
            self.stats.record_refresh();
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SerdeCodec;
    use serde::{Deserialize, Serialize};
    use stashdb_backend::{DocumentBackend, KeyValueBackend};
    use stashdb_core::{FnIdentifier, LockStrategy};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.into(),
            body: body.into(),
        }
    }

    fn store() -> Arc<VersionedStore<Note>> {
        Arc::new(VersionedStore::new(
            FnIdentifier::for_id(|n: &Note| Some(n.id.clone())),
            LockStrategy::Serialized,
        ))
    }

    fn config(dir: &TempDir) -> PersistenceConfig {
        PersistenceConfig::new("notes")
            .with_flush_delay(Duration::from_secs(3600))
            .with_crash_dump_dir(dir.path())
    }

    fn engine(backend: Arc<dyn BackendClient>, dir: &TempDir) -> SyncEngine<Note> {
        SyncEngine::new(store(), backend, SerdeCodec::new(), config(dir))
    }

    fn key(id: &str) -> Key {
        Key::new("notes", "id", id)
    }

    #[test]
    fn flush_writes_dirty_entries() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        let engine = engine(backend.clone(), &dir);

        engine.store().store(note("a", "first")).unwrap();
        engine.store().store(note("b", "second")).unwrap();
        let report = engine.flush().unwrap();

        assert_eq!(report.drained, 2);
        assert_eq!(report.persisted, 2);
        assert!(report.dumps.is_empty());
        let record = backend.get_by_id("notes", &key("a")).unwrap().unwrap();
        assert_eq!(record["body"], serde_json::json!("first"));
        assert!(record["modified"].as_i64().unwrap() > 0);
    }

    #[test]
    fn second_flush_is_empty() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        let engine = engine(backend.clone(), &dir);

        engine.store().store(note("a", "x")).unwrap();
        engine.flush().unwrap();
        let calls = backend.stats().batch_calls();

        let report = engine.flush().unwrap();
        assert!(report.is_empty());
        assert_eq!(backend.stats().batch_calls(), calls);
    }

    #[test]
    fn applied_deletes_drop_tombstones() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        let engine = engine(backend.clone(), &dir);

        engine.store().store(note("a", "x")).unwrap();
        engine.flush().unwrap();
        engine.store().delete("a");
        assert_eq!(engine.store().entry_count(), 1);

        let report = engine.flush().unwrap();
        assert_eq!(report.removed_tombstones, 1);
        assert_eq!(engine.store().entry_count(), 0);
        assert!(backend.get_by_id("notes", &key("a")).unwrap().is_none());
    }

    #[test]
    fn failed_batch_is_dumped_and_tombstone_kept() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(DocumentBackend::new());
        let engine = engine(backend.clone(), &dir);

        engine.store().store(note("a", "x")).unwrap();
        engine.store().delete("a");
        backend.faults().fail_batches(1);

        let report = engine.flush().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.dumps.len(), 1);
        assert!(report.dumps[0].starts_with(engine.crash_dump_dir()));
        assert!(engine.store().metadata("a").unwrap().is_deleted());
    }

    #[test]
    fn watermark_advances_past_failures() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        let engine = engine(backend.clone(), &dir);

        engine.store().store(note("a", "x")).unwrap();
        backend.faults().fail_batches(1);
        let report = engine.flush().unwrap();
        assert_eq!(engine.watermark(), report.watermark);
        assert!(engine.flush().unwrap().is_empty());
    }

    #[test]
    fn refresh_applies_only_newer_records() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(KeyValueBackend::new());
        let engine = engine(backend.clone(), &dir);

        let local = engine.store().store(note("a", "local")).unwrap();
        let modified = engine.store().metadata("a").unwrap().modified;

        let codec = SerdeCodec::<Note>::new();
        let stale = codec.to_record(&Metadata::new(note("a", "stale"), modified)).unwrap();
        backend.insert("notes", &key("a"), stale);
        assert!(!engine.refresh_by_id("a").unwrap());
        assert_eq!(engine.store().get("a"), Some(local));

        let newer = codec
            .to_record(&Metadata::new(note("a", "remote"), modified + 10))
            .unwrap();
        backend.insert("notes", &key("a"), newer);
        assert!(engine.refresh_by_id("a").unwrap());
        assert_eq!(engine.store().get("a").unwrap().body, "remote");
        assert!(engine.store().clock().last() >= modified + 10);
    }

    #[test]
    fn start_twice_and_after_close() {
        let dir = TempDir::new().unwrap();
        let engine = engine(Arc::new(KeyValueBackend::new()), &dir);

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(matches!(engine.start(), Err(SyncError::AlreadyStarted)));

        engine.close().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(engine.start(), Err(SyncError::Stopped)));
        assert!(matches!(engine.flush(), Err(SyncError::Stopped)));
        assert!(matches!(engine.close(), Err(SyncError::Stopped)));
    }
}
