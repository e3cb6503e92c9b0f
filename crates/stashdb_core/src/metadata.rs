//! Versioned envelope around a stored object.

use std::fmt::Debug;

/// Bound shared by every type kept in a [`crate::VersionedStore`].
///
/// `PartialEq` doubles as the content fingerprint used by replication to
/// recognise entries that have not changed.
pub trait StoredObject: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> StoredObject for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// A stored object together with its modification timestamp and tombstone flag.
///
/// A deleted entry stays in the table until it has been persisted downstream
/// and then removed permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata<T> {
    /// Current value.
    pub object: T,
    /// Last modification time in milliseconds.
    pub modified: i64,
    /// Tombstone flag.
    pub deleted: bool,
}

impl<T> Metadata<T> {
    /// Creates a live entry.
    pub fn new(object: T, modified: i64) -> Self {
        Self {
            object,
            modified,
            deleted: false,
        }
    }

    /// Creates a tombstoned entry.
    pub fn tombstone(object: T, modified: i64) -> Self {
        Self {
            object,
            modified,
            deleted: true,
        }
    }

    /// Returns true if the entry is tombstoned.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Replaces the object and revives the entry.
    ///
    /// `modified` never moves backwards: if `at` is not past the current
    /// timestamp the entry is bumped by one millisecond instead.
    pub fn update(&mut self, object: T, at: i64) {
        self.object = object;
        self.deleted = false;
        self.modified = at.max(self.modified + 1);
    }

    /// Marks the entry as deleted.
    pub fn delete(&mut self, at: i64) {
        self.deleted = true;
        self.modified = at.max(self.modified + 1);
    }
}

impl<T: PartialEq> Metadata<T> {
    /// Returns true if `other` carries the same version and content as `self`.
    pub fn looks_unmodified(&self, other: &Metadata<T>) -> bool {
        self.modified == other.modified && self.deleted == other.deleted && self.object == other.object
    }
}
