//! # stashdb_backend
//!
//! Everything between a stashdb store and an external backend.
//!
//! This crate provides:
//! - [`BackendClient`]: the capability set every backend offers
//!   (scan, point read, batch write, conditional update, change feed)
//! - [`Key`] with deterministic hashing of long key values
//! - [`Operation`] and [`OperationBatch`], packed by [`BatchPacker`] to fit
//!   backend batch rules and executed by [`BatchWriter`]
//! - [`AtomicUpdateCoordinator`] for optimistic-concurrency updates
//! - [`KeyValueBackend`] and [`DocumentBackend`], in-memory backends with
//!   fault injection for tests
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use stashdb_backend::{BatchPacker, BatchWriter, Key, KeyValueBackend, Operation, Record};
//!
//! let backend = Arc::new(KeyValueBackend::new());
//! let writer = BatchWriter::new(backend.clone(), "beans");
//!
//! let operations = (0..30).map(|i| Operation::create(Key::new("beans", "id", i.to_string()), Record::new()));
//! let mut batches = BatchPacker::pack(operations, 25);
//! let summary = writer.write_all(&mut batches).unwrap();
//!
//! assert_eq!(summary.calls, 2);
//! assert_eq!(backend.len("beans"), 30);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod client;
mod config;
mod document;
mod error;
mod key;
mod kv;
mod memory;
mod operation;
mod packer;
mod reserved;
mod value;
mod writer;

pub use atomic::{AtomicUpdate, AtomicUpdateCoordinator};
pub use client::{BackendClient, BatchOutcome, ChangeKind, ChangeNotification, ChangeStream, ConditionalWrite};
pub use config::{AtomicUpdateConfig, BackendConfig, TableSettings};
pub use document::DocumentBackend;
pub use error::{BackendError, BackendResult};
pub use key::{physical_key_value, Key, MAX_KEY_VALUE_LEN};
pub use kv::KeyValueBackend;
pub use memory::{BackendStats, FaultInjector, StatsSnapshot};
pub use operation::{Operation, OperationBatch, OperationKind, OperationState};
pub use packer::{BatchPacker, DEFAULT_BATCH_SIZE};
pub use reserved::{is_attribute_name_appropriate, is_attribute_name_reserved, is_table_name_appropriate};
pub use value::{integer_field, project, string_field, FieldValue, Record};
pub use writer::{BatchWriter, WriteSummary};
