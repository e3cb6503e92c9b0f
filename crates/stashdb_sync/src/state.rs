//! Engine lifecycle, cycle reports and counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle of a [`crate::SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Created, not started. Manual flushes are allowed.
    #[default]
    Idle,
    /// Loaded; the flush timer (and watcher, if enabled) are running.
    Running,
    /// Closed. No further cycles run.
    Stopped,
}

impl EngineState {
    /// Returns true if [`crate::SyncEngine::start`] may be called.
    pub fn can_start(&self) -> bool {
        matches!(self, EngineState::Idle)
    }

    /// Returns true once the engine has been closed.
    pub fn is_stopped(&self) -> bool {
        matches!(self, EngineState::Stopped)
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries drained from the store.
    pub drained: usize,
    /// Operations the backend applied.
    pub persisted: usize,
    /// Tombstones removed after their delete was applied.
    pub removed_tombstones: usize,
    /// Operations that could not be persisted.
    pub failed: usize,
    /// Crash dumps written during the cycle.
    pub dumps: Vec<PathBuf>,
    /// Watermark after the cycle.
    pub watermark: i64,
}

impl FlushReport {
    /// Returns true if nothing was drained.
    pub fn is_empty(&self) -> bool {
        self.drained == 0
    }
}

/// Counters of a sync engine.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct SyncStats {
    flush_cycles: AtomicU64,
    operations_persisted: AtomicU64,
    operations_failed: AtomicU64,
    crash_dumps: AtomicU64,
    records_loaded: AtomicU64,
    notifications: AtomicU64,
    refreshes: AtomicU64,
    errors: AtomicU64,
}

impl SyncStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_flush(&self, report: &FlushReport) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
        self.operations_persisted
            .fetch_add(report.persisted as u64, Ordering::Relaxed);
        self.operations_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.crash_dumps
            .fetch_add(report.dumps.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self, records: usize) {
        self.records_loaded.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed flush cycles.
    pub fn flush_cycles(&self) -> u64 {
        self.flush_cycles.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            flush_cycles: self.flush_cycles(),
            operations_persisted: self.operations_persisted.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            crash_dumps: self.crash_dumps.load(Ordering::Relaxed),
            records_loaded: self.records_loaded.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatsSnapshot {
    /// Completed flush cycles.
    pub flush_cycles: u64,
    /// Operations the backend applied.
    pub operations_persisted: u64,
    /// Operations that ended in a crash dump or were dropped.
    pub operations_failed: u64,
    /// Crash-dump files written.
    pub crash_dumps: u64,
    /// Records installed by the initial load.
    pub records_loaded: u64,
    /// Change notifications received.
    pub notifications: u64,
    /// Entries replaced by a newer backend record.
    pub refreshes: u64,
    /// Errors logged by background cycles.
    pub errors: u64,
}
