//! Test fixtures.
//!
//! [`Bean`] is the sample stored type used across the workspace tests.

use serde::{Deserialize, Serialize};
use stashdb_backend::{integer_field, string_field, FieldValue, Record};
use stashdb_core::{FnIdentifier, LockStrategy, Metadata, VersionedStore};
use stashdb_sync::{crash_dump, PersistenceConfig, RecordCodec, SyncError, SyncResult, MODIFIED_FIELD};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Name of the table fixtures write to.
pub const BEAN_TABLE: &str = "beans";

/// A small stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bean {
    /// Identifier; empty until the store assigns one.
    pub id: String,
    /// Where the beans come from.
    pub origin: String,
    /// Weight in stock.
    pub grams: i64,
}

/// Creates a bean.
pub fn bean(id: &str, origin: &str, grams: i64) -> Bean {
    Bean {
        id: id.to_owned(),
        origin: origin.to_owned(),
        grams,
    }
}

/// Identifier reading and assigning [`Bean::id`].
pub fn bean_identifier() -> FnIdentifier<Bean> {
    FnIdentifier::for_id(|b: &Bean| (!b.id.is_empty()).then(|| b.id.clone()))
        .with_setter(|b: &mut Bean, id| b.id = id)
}

/// A serialized bean store.
pub fn bean_store() -> Arc<VersionedStore<Bean>> {
    bean_store_with(LockStrategy::Serialized)
}

/// A bean store with the given lock strategy.
pub fn bean_store_with(strategy: LockStrategy) -> Arc<VersionedStore<Bean>> {
    Arc::new(VersionedStore::new(bean_identifier(), strategy))
}

/// Hand-written record mapping for [`Bean`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BeanCodec;

impl RecordCodec<Bean> for BeanCodec {
    fn to_record(&self, metadata: &Metadata<Bean>) -> SyncResult<Record> {
        let mut record = Record::new();
        record.insert("id".into(), FieldValue::from(metadata.object.id.clone()));
        record.insert("origin".into(), FieldValue::from(metadata.object.origin.clone()));
        record.insert("grams".into(), FieldValue::from(metadata.object.grams));
        record.insert(MODIFIED_FIELD.into(), FieldValue::from(metadata.modified));
        Ok(record)
    }

    fn from_record(&self, record: &Record) -> SyncResult<Metadata<Bean>> {
        let id = string_field(record, "id").ok_or_else(|| SyncError::codec("bean record without id"))?;
        let bean = Bean {
            id: id.to_owned(),
            origin: string_field(record, "origin").unwrap_or_default().to_owned(),
            grams: integer_field(record, "grams").unwrap_or(0),
        };
        Ok(Metadata::new(bean, integer_field(record, MODIFIED_FIELD).unwrap_or(0)))
    }
}

/// A temporary crash-dump directory, removed on drop.
pub struct TestDumpDir {
    dir: TempDir,
}

impl TestDumpDir {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Dump files written so far, sorted.
    pub fn dumps(&self) -> Vec<PathBuf> {
        crash_dump::list_dumps(self.path()).expect("Failed to list crash dumps")
    }

    /// A persistence config for [`BEAN_TABLE`] dumping here, with a flush
    /// delay long enough that only explicit flushes run.
    pub fn config(&self) -> PersistenceConfig {
        PersistenceConfig::new(BEAN_TABLE)
            .with_flush_delay(Duration::from_secs(3600))
            .with_watch_poll_interval(Duration::from_millis(10))
            .with_crash_dump_dir(self.path())
    }
}

impl Default for TestDumpDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_core::Identifier;

    #[test]
    fn identifier_treats_empty_as_absent() {
        let identifier = bean_identifier();
        assert_eq!(identifier.get(&bean("", "x", 0)), None);
        assert_eq!(identifier.get(&bean("b1", "x", 0)).as_deref(), Some("b1"));
    }

    #[test]
    fn store_assigns_missing_ids() {
        let store = bean_store();
        let stored = store.store(bean("", "x", 1)).unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(store.get(&stored.id), Some(stored));
    }

    #[test]
    fn codec_maps_all_fields() {
        let record = BeanCodec
            .to_record(&Metadata::new(bean("b1", "arabica", 7), 99))
            .unwrap();
        let decoded = BeanCodec.from_record(&record).unwrap();
        assert_eq!(decoded.object, bean("b1", "arabica", 7));
        assert_eq!(decoded.modified, 99);
    }

    #[test]
    fn codec_requires_id() {
        assert!(BeanCodec.from_record(&Record::new()).is_err());
    }

    #[test]
    fn dump_dir_starts_empty() {
        let dir = TestDumpDir::new();
        assert!(dir.dumps().is_empty());
        assert_eq!(dir.config().crash_dump_dir, dir.path());
    }
}
