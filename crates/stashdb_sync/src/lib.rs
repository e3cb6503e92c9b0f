//! # stashdb_sync
//!
//! Write-behind persistence for stashdb stores.
//!
//! A [`SyncEngine`] keeps a [`stashdb_core::VersionedStore`] and one backend
//! table in step:
//! - on start it loads the table into the store
//! - a fixed-delay flush drains modified entries and writes them in packed
//!   batches, removing tombstones once their delete is applied
//! - operations the backend does not apply are written to gzip JSON crash
//!   dumps, which [`crash_dump::replay`] can re-submit
//! - optionally, backend change notifications refresh the store
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use stashdb_backend::KeyValueBackend;
//! use stashdb_core::{FnIdentifier, LockStrategy, VersionedStore};
//! use stashdb_sync::{PersistenceConfig, SerdeCodec, SyncEngine};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Bean { id: String, grams: i64 }
//!
//! let store = Arc::new(VersionedStore::new(
//!     FnIdentifier::for_id(|b: &Bean| Some(b.id.clone())),
//!     LockStrategy::Serialized,
//! ));
//! let backend = Arc::new(KeyValueBackend::new());
//! let dumps = std::env::temp_dir().join("stashdb-doc-dumps");
//! let engine = SyncEngine::new(
//!     store.clone(),
//!     backend.clone(),
//!     SerdeCodec::new(),
//!     PersistenceConfig::new("beans").with_crash_dump_dir(dumps),
//! );
//!
//! store.store(Bean { id: "b1".into(), grams: 1 }).unwrap();
//! let report = engine.flush().unwrap();
//! assert_eq!(report.persisted, 1);
//! assert_eq!(backend.len("beans"), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
pub mod crash_dump;
mod engine;
mod error;
mod state;
mod watch;

pub use codec::{RecordCodec, SerdeCodec, MODIFIED_FIELD};
pub use config::{PersistenceConfig, RetryConfig};
pub use crash_dump::{CrashDumper, DumpEntry};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use state::{EngineState, FlushReport, SyncStats, SyncStatsSnapshot};
pub use watch::Watcher;
