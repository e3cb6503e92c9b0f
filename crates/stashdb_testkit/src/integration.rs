//! Helpers for tests involving background threads and listeners.

use parking_lot::Mutex;
use stashdb_core::{DataListener, EventKind, IdObject};
use std::thread;
use std::time::{Duration, Instant};

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition eventually held.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Panics with `message` unless `condition` holds within five seconds.
pub fn assert_eventually(message: &str, condition: impl FnMut() -> bool) {
    assert!(wait_until(Duration::from_secs(5), condition), "condition never held: {message}");
}

/// A listener recording every event it receives.
#[derive(Debug)]
pub struct RecordingListener<T> {
    events: Mutex<Vec<(EventKind, Vec<String>)>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> RecordingListener<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Recorded events as `(kind, ids)`.
    pub fn events(&self) -> Vec<(EventKind, Vec<String>)> {
        self.events.lock().clone()
    }

    /// Ids reported under `kind`, in order.
    pub fn ids(&self, kind: EventKind) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, kind: EventKind, objects: &[IdObject<T>]) {
        let ids = objects.iter().map(|o| o.id.clone()).collect();
        self.events.lock().push((kind, ids));
    }
}

impl<T> Default for RecordingListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync> DataListener<T> for RecordingListener<T> {
    fn added(&self, objects: &[IdObject<T>]) {
        self.record(EventKind::Added, objects);
    }

    fn updated(&self, objects: &[IdObject<T>]) {
        self.record(EventKind::Updated, objects);
    }

    fn deleted(&self, objects: &[IdObject<T>]) {
        self.record(EventKind::Deleted, objects);
    }
}
