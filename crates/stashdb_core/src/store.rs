//! In-memory versioned object table.

use crate::clock::Clock;
use crate::config::LockStrategy;
use crate::error::StoreResult;
use crate::identifier::Identifier;
use crate::listener::{DataListener, EventKind, IdObject, Listeners, StoreEvent};
use crate::lock::IdLock;
use crate::metadata::{Metadata, StoredObject};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::trace;

/// Position in the `(modified, id)` order of
/// [`VersionedStore::updated_since`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    /// Modification timestamp of the last entry returned.
    pub modified: i64,
    /// Id of the last entry returned.
    pub id: String,
}

impl PageCursor {
    /// Cursor positioned at the given entry.
    pub fn new(modified: i64, id: impl Into<String>) -> Self {
        Self {
            modified,
            id: id.into(),
        }
    }

    fn precedes(&self, modified: i64, id: &str) -> bool {
        (self.modified, self.id.as_str()) < (modified, id)
    }
}

/// Thread-safe map from id to [`Metadata`], with change notification.
///
/// Deletions leave tombstones behind so that downstream persistence can
/// observe them; [`remove_permanently`](Self::remove_permanently) drops an
/// entry for good once that has happened.
///
/// Modification timestamps come from a per-store monotonic [`Clock`] and
/// strictly increase per id across every mutation.
///
/// # Example
///
/// ```rust
/// use stashdb_core::{FnIdentifier, LockStrategy, VersionedStore};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Note { id: Option<String>, text: String }
///
/// let store = VersionedStore::new(
///     FnIdentifier::for_id(|n: &Note| n.id.clone()).with_setter(|n: &mut Note, id| n.id = Some(id)),
///     LockStrategy::Serialized,
/// );
///
/// let note = store.store(Note { id: None, text: "hi".into() }).unwrap();
/// let id = note.id.clone().unwrap();
/// assert_eq!(store.get(&id), Some(note));
///
/// store.delete(&id);
/// assert!(store.get(&id).is_none());
/// assert!(store.metadata(&id).unwrap().deleted);
/// ```
pub struct VersionedStore<T> {
    identifier: Box<dyn Identifier<T>>,
    lock: IdLock,
    clock: Clock,
    data: RwLock<HashMap<String, Metadata<T>>>,
    listeners: Listeners<T>,
}

impl<T: StoredObject> VersionedStore<T> {
    /// Creates an empty store.
    pub fn new(identifier: impl Identifier<T> + 'static, strategy: LockStrategy) -> Self {
        Self {
            identifier: Box::new(identifier),
            lock: IdLock::new(strategy),
            clock: Clock::new(),
            data: RwLock::new(HashMap::new()),
            listeners: Listeners::new(),
        }
    }

    /// The identifier used to resolve object ids.
    pub fn identifier(&self) -> &dyn Identifier<T> {
        self.identifier.as_ref()
    }

    /// The per-id lock guarding mutations.
    pub fn id_lock(&self) -> &IdLock {
        &self.lock
    }

    /// The clock stamping modifications.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Inserts or replaces `object`, assigning an id if it carries none.
    ///
    /// Fires `added` if no live value existed for the id, `updated` otherwise.
    /// Storing into a tombstone revives it.
    ///
    /// # Errors
    ///
    /// Fails only if the object has no id and the identifier cannot assign one.
    pub fn store(&self, mut object: T) -> StoreResult<T> {
        let id = self.assign_id(&mut object)?;
        self.lock.synchronized_on(&id, || {
            let added = self.put(&id, object.clone());
            let kind = if added {
                EventKind::Added
            } else {
                EventKind::Updated
            };
            self.listeners
                .fire(kind, vec![IdObject::new(id.clone(), object.clone())]);
        });
        Ok(object)
    }

    /// Stores many objects, firing at most one `added` and one `updated` event.
    ///
    /// # Errors
    ///
    /// Stops at the first object that cannot be given an id; objects before it
    /// stay stored and are reported.
    pub fn store_all(&self, objects: impl IntoIterator<Item = T>) -> StoreResult<Vec<T>> {
        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut stored = Vec::new();
        let mut failure = None;

        for mut object in objects {
            let id = match self.assign_id(&mut object) {
                Ok(id) => id,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let is_new = self
                .lock
                .synchronized_on(&id, || self.put(&id, object.clone()));
            let pair = IdObject::new(id, object.clone());
            if is_new {
                added.push(pair);
            } else {
                updated.push(pair);
            }
            stored.push(object);
        }

        self.listeners.fire(EventKind::Added, added);
        self.listeners.fire(EventKind::Updated, updated);
        match failure {
            Some(e) => Err(e),
            None => Ok(stored),
        }
    }

    /// Applies `f` to the live value of `id` and stores the result.
    ///
    /// Returns `None` without calling `f` when `id` is absent or tombstoned.
    pub fn update<F>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&T) -> T,
    {
        self.lock.synchronized_on(id, || {
            let current = self.get(id)?;
            let next = f(&current);
            {
                let mut data = self.data.write();
                let entry = data.get_mut(id).filter(|m| !m.deleted)?;
                entry.update(next.clone(), self.clock.tick());
            }
            self.listeners
                .fire(EventKind::Updated, vec![IdObject::new(id, next.clone())]);
            Some(next)
        })
    }

    /// Updates `id` with `f` if it is live, otherwise stores `init()`.
    ///
    /// Both branches run under the lock for `id`.
    ///
    /// # Errors
    ///
    /// Propagates [`store`](Self::store) failures of the init branch.
    pub fn update_or_init<F, I>(&self, id: Option<&str>, f: F, init: I) -> StoreResult<T>
    where
        F: FnOnce(&T) -> T,
        I: FnOnce() -> T,
    {
        let Some(id) = id else {
            return self.store(init());
        };

        self.lock.synchronized_on(id, || match self.update(id, f) {
            Some(updated) => Ok(updated),
            None => self.store(init()),
        })
    }

    /// Tombstones the live value of `id`, firing `deleted`.
    ///
    /// Returns the deleted value, or `None` if there was no live value.
    pub fn delete(&self, id: &str) -> Option<T> {
        self.lock.synchronized_on(id, || {
            let old = {
                let mut data = self.data.write();
                let entry = data.get_mut(id).filter(|m| !m.deleted)?;
                entry.delete(self.clock.tick());
                entry.object.clone()
            };
            self.listeners
                .fire(EventKind::Deleted, vec![IdObject::new(id, old.clone())]);
            Some(old)
        })
    }

    /// Tombstones every live entry, firing one `deleted` event.
    pub fn delete_all(&self) -> Vec<IdObject<T>> {
        let deleted: Vec<_> = {
            let mut data = self.data.write();
            data.iter_mut()
                .filter(|(_, m)| !m.deleted)
                .map(|(id, m)| {
                    m.delete(self.clock.tick());
                    IdObject::new(id.clone(), m.object.clone())
                })
                .collect()
        };
        trace!(count = deleted.len(), "tombstoned all entries");
        self.listeners.fire(EventKind::Deleted, deleted.clone());
        deleted
    }

    /// Drops the entry for `id`, tombstone or not, without notification.
    pub fn remove_permanently(&self, id: &str) -> Option<Metadata<T>> {
        self.data.write().remove(id)
    }

    // ========================================================================
    // Raw access for replication and persistence
    // ========================================================================

    /// Installs `metadata` as-is without notification.
    ///
    /// Callers hold the lock for `id`. Returns true if no live value existed.
    pub fn put_metadata(&self, id: &str, metadata: Metadata<T>) -> bool {
        let mut data = self.data.write();
        data.insert(id.to_owned(), metadata)
            .map_or(true, |previous| previous.deleted)
    }

    /// Installs entries read from durable storage, without notification.
    ///
    /// Entries whose id cannot be resolved are skipped. Returns the number loaded.
    pub fn load(&self, entries: impl IntoIterator<Item = Metadata<T>>) -> usize {
        let mut data = self.data.write();
        let mut loaded = 0;
        for entry in entries {
            if let Some(id) = self.identifier.get(&entry.object) {
                self.clock.observe(entry.modified);
                data.insert(id, entry);
                loaded += 1;
            }
        }
        loaded
    }

    /// Notifies listeners of added objects.
    pub fn fire_added(&self, objects: Vec<IdObject<T>>) {
        self.listeners.fire(EventKind::Added, objects);
    }

    /// Notifies listeners of updated objects.
    pub fn fire_updated(&self, objects: Vec<IdObject<T>>) {
        self.listeners.fire(EventKind::Updated, objects);
    }

    /// Notifies listeners of deleted objects.
    pub fn fire_deleted(&self, objects: Vec<IdObject<T>>) {
        self.listeners.fire(EventKind::Deleted, objects);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the live value of `id`.
    pub fn get(&self, id: &str) -> Option<T> {
        self.data
            .read()
            .get(id)
            .filter(|m| !m.deleted)
            .map(|m| m.object.clone())
    }

    /// Returns the entry for `id`, including tombstones.
    pub fn metadata(&self, id: &str) -> Option<Metadata<T>> {
        self.data.read().get(id).cloned()
    }

    /// Returns true if `id` has a live value.
    pub fn contains(&self, id: &str) -> bool {
        self.data.read().get(id).is_some_and(|m| !m.deleted)
    }

    /// All live values, in no particular order.
    pub fn select(&self) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|m| !m.deleted)
            .map(|m| m.object.clone())
            .collect()
    }

    /// Live values matching `predicate`.
    pub fn select_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|m| !m.deleted && predicate(&m.object))
            .map(|m| m.object.clone())
            .collect()
    }

    /// Live values ordered by id.
    pub fn list(&self) -> Vec<IdObject<T>> {
        let mut all: Vec<_> = self
            .data
            .read()
            .iter()
            .filter(|(_, m)| !m.deleted)
            .map(|(id, m)| IdObject::new(id.clone(), m.object.clone()))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Ids of all live values.
    pub fn ids(&self) -> Vec<String> {
        self.data
            .read()
            .iter()
            .filter(|(_, m)| !m.deleted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of live values.
    pub fn size(&self) -> usize {
        self.data.read().values().filter(|m| !m.deleted).count()
    }

    /// Returns true if there are no live values.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of entries including tombstones.
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Every entry, tombstones included, modified strictly after `since`.
    pub fn select_updated_since(&self, since: i64) -> Vec<(String, Metadata<T>)> {
        self.data
            .read()
            .iter()
            .filter(|(_, m)| m.modified > since)
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect()
    }

    /// Reserves a timestamp and returns it with every entry modified
    /// strictly after `since`, tombstones included.
    ///
    /// Mutations stamp entries while holding the table's write lock and the
    /// timestamp here is taken under the read lock, so every entry stamped
    /// before the returned timestamp is part of the result.
    pub fn drain_since(&self, since: i64) -> (i64, Vec<(String, Metadata<T>)>) {
        let data = self.data.read();
        let now = self.clock.tick();
        let dirty = data
            .iter()
            .filter(|(_, m)| m.modified > since)
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect();
        (now, dirty)
    }

    /// Live entries modified strictly after `since`, ordered by
    /// `(modified, id)`, at most `limit` of them and all past `after`.
    ///
    /// Pass the [`PageCursor`] of the last entry of one page to get the next.
    /// An entry modified between two calls moves behind the cursor and is
    /// returned again; the others keep their position.
    pub fn updated_since(
        &self,
        since: i64,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Vec<(String, Metadata<T>)> {
        let mut matching: Vec<_> = self
            .data
            .read()
            .iter()
            .filter(|(_, m)| !m.deleted && m.modified > since)
            .filter(|(id, m)| after.map_or(true, |cursor| cursor.precedes(m.modified, id)))
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect();
        matching.sort_by(|a, b| (a.1.modified, &a.0).cmp(&(b.1.modified, &b.0)));
        matching.truncate(limit);
        matching
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers a listener.
    pub fn add_listener(&self, listener: Arc<dyn DataListener<T>>) {
        self.listeners.add(listener);
    }

    /// Unregisters a listener. Returns true if it was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn DataListener<T>>) -> bool {
        self.listeners.remove(listener)
    }

    /// Returns a channel receiving every future change event.
    pub fn subscribe(&self) -> Receiver<StoreEvent<T>> {
        self.listeners.subscribe()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn assign_id(&self, object: &mut T) -> StoreResult<String> {
        self.identifier
            .get_or_init(object, &|candidate| self.contains(candidate))
    }

    /// Writes a live value. Returns true if no live value existed.
    fn put(&self, id: &str, object: T) -> bool {
        let mut data = self.data.write();
        let modified = self.clock.tick();
        match data.get_mut(id) {
            Some(entry) => {
                let was_deleted = entry.deleted;
                entry.update(object, modified);
                was_deleted
            }
            None => {
                data.insert(id.to_owned(), Metadata::new(object, modified));
                true
            }
        }
    }
}

impl<T> std::fmt::Debug for VersionedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("entries", &self.data.read().len())
            .field("lock", &self.lock)
            .finish()
    }
}
