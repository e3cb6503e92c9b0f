//! Data-change notification.
//!
//! Every structural mutation of a [`crate::VersionedStore`] is reported to the
//! registered [`DataListener`]s and to channel subscribers. Listeners are
//! invoked synchronously on the mutating thread.
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = store.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("{:?}: {} objects", event.kind, event.objects.len());
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// An object paired with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct IdObject<T> {
    /// Object id.
    pub id: String,
    /// Object value at the time of the event.
    pub object: T,
}

impl<T> IdObject<T> {
    /// Creates a new pair.
    pub fn new(id: impl Into<String>, object: T) -> Self {
        Self {
            id: id.into(),
            object,
        }
    }
}

/// Callback interface for store changes.
///
/// All methods default to no-ops so implementors override only what they need.
/// Each call carries every object affected by one store operation.
pub trait DataListener<T>: Send + Sync {
    /// Objects became live (no live prior value existed).
    fn added(&self, _objects: &[IdObject<T>]) {}

    /// Live objects were replaced.
    fn updated(&self, _objects: &[IdObject<T>]) {}

    /// Objects were deleted.
    fn deleted(&self, _objects: &[IdObject<T>]) {}
}

/// Kind of a [`StoreEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// See [`DataListener::added`].
    Added,
    /// See [`DataListener::updated`].
    Updated,
    /// See [`DataListener::deleted`].
    Deleted,
}

/// A change notification delivered through [`Listeners::subscribe`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent<T> {
    /// What happened.
    pub kind: EventKind,
    /// Affected objects.
    pub objects: Vec<IdObject<T>>,
}

/// Registered listeners and channel subscribers of one store.
pub struct Listeners<T> {
    listeners: RwLock<Vec<Arc<dyn DataListener<T>>>>,
    subscribers: RwLock<Vec<Sender<StoreEvent<T>>>>,
}

impl<T: Clone> Listeners<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Registers a listener.
    pub fn add(&self, listener: Arc<dyn DataListener<T>>) {
        self.listeners.write().push(listener);
    }

    /// Unregisters a listener. Returns true if it was registered.
    pub fn remove(&self, listener: &Arc<dyn DataListener<T>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Returns a receiver for all future events.
    ///
    /// Dropping the receiver unsubscribes on the next emitted event.
    pub fn subscribe(&self) -> Receiver<StoreEvent<T>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty() && self.subscribers.read().is_empty()
    }

    /// Delivers an event. Empty object lists are not delivered.
    pub fn fire(&self, kind: EventKind, objects: Vec<IdObject<T>>) {
        if objects.is_empty() {
            return;
        }

        // snapshot so listeners may (un)register from inside a callback
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in &listeners {
            match kind {
                EventKind::Added => listener.added(&objects),
                EventKind::Updated => listener.updated(&objects),
                EventKind::Deleted => listener.deleted(&objects),
            }
        }

        let mut subscribers = self.subscribers.write();
        if subscribers.is_empty() {
            return;
        }
        let event = StoreEvent { kind, objects };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl<T: Clone> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(EventKind, usize)>>,
    }

    impl DataListener<u32> for Recorder {
        fn added(&self, objects: &[IdObject<u32>]) {
            self.seen.lock().push((EventKind::Added, objects.len()));
        }

        fn deleted(&self, objects: &[IdObject<u32>]) {
            self.seen.lock().push((EventKind::Deleted, objects.len()));
        }
    }

    #[test]
    fn listeners_receive_batches() {
        let listeners = Listeners::new();
        let recorder = Arc::new(Recorder::default());
        listeners.add(recorder.clone());

        listeners.fire(
            EventKind::Added,
            vec![IdObject::new("a", 1), IdObject::new("b", 2)],
        );
        listeners.fire(EventKind::Updated, vec![IdObject::new("a", 3)]);
        listeners.fire(EventKind::Deleted, vec![IdObject::new("a", 3)]);

        assert_eq!(
            *recorder.seen.lock(),
            vec![(EventKind::Added, 2), (EventKind::Deleted, 1)]
        );
    }

    #[test]
    fn empty_batches_are_not_delivered() {
        let listeners: Listeners<u32> = Listeners::new();
        let rx = listeners.subscribe();
        listeners.fire(EventKind::Added, Vec::new());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removed_listener_is_silent() {
        let listeners = Listeners::new();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn DataListener<u32>> = recorder.clone();
        listeners.add(handle.clone());
        assert!(listeners.remove(&handle));
        assert!(!listeners.remove(&handle));

        listeners.fire(EventKind::Added, vec![IdObject::new("a", 1)]);
        assert!(recorder.seen.lock().is_empty());
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let listeners: Listeners<u32> = Listeners::new();
        let keep = listeners.subscribe();
        drop(listeners.subscribe());

        listeners.fire(EventKind::Added, vec![IdObject::new("a", 1)]);
        assert_eq!(listeners.subscribers.read().len(), 1);

        let event = keep.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.objects[0].id, "a");
    }
}
