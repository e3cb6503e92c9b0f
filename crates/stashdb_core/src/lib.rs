//! # stashdb_core
//!
//! In-memory versioned object store with change notification and
//! master/slave replication.
//!
//! This crate provides:
//! - [`VersionedStore`]: id-keyed objects with modification timestamps and tombstones
//! - [`DataListener`] and channel subscriptions for change events
//! - [`IdLock`]: per-id mutual exclusion
//! - [`Replicator`]: periodic convergence of a slave store to a master
//! - [`Scheduled`]: fixed-delay background tasks
//!
//! Durable persistence lives in `stashdb_sync`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod identifier;
mod listener;
mod lock;
mod metadata;
mod replicator;
mod scheduler;
mod store;

pub use clock::{now_millis, Clock};
pub use config::{LockStrategy, ReplicatorConfig};
pub use error::{StoreError, StoreResult};
pub use identifier::{FnIdentifier, Identifier};
pub use listener::{DataListener, EventKind, IdObject, Listeners, StoreEvent};
pub use lock::IdLock;
pub use metadata::{Metadata, StoredObject};
pub use replicator::{ReplicationMaster, ReplicationReport, Replicator};
pub use scheduler::Scheduled;
pub use store::{PageCursor, VersionedStore};
