//! Explicit object⇄record mapping.
//!
//! A [`RecordCodec`] turns a store entry into the flat record a backend
//! stores and back. The modification timestamp travels in the
//! [`MODIFIED_FIELD`] column so a reloaded entry keeps its version.

use crate::error::{SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stashdb_backend::{integer_field, FieldValue, Record};
use stashdb_core::Metadata;
use std::marker::PhantomData;

/// Column holding [`Metadata::modified`].
pub const MODIFIED_FIELD: &str = "modified";

/// Maps store entries to backend records.
pub trait RecordCodec<T>: Send + Sync {
    /// Encodes a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Codec`] if the object cannot be represented.
    fn to_record(&self, metadata: &Metadata<T>) -> SyncResult<Record>;

    /// Decodes a record into a live entry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Codec`] if the record is malformed.
    fn from_record(&self, record: &Record) -> SyncResult<Metadata<T>>;
}

/// A codec for types implementing serde's traits.
///
/// The object must serialize to a JSON object; its fields become record
/// columns next to [`MODIFIED_FIELD`]. Records without a timestamp decode
/// with `modified = 0`.
pub struct SerdeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeCodec<T> {
    /// Creates the codec.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordCodec<T> for SerdeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_record(&self, metadata: &Metadata<T>) -> SyncResult<Record> {
        let FieldValue::Object(fields) = serde_json::to_value(&metadata.object)? else {
            return Err(SyncError::codec("object does not serialize to a map"));
        };
        let mut record: Record = fields.into_iter().collect();
        if record.contains_key(MODIFIED_FIELD) {
            return Err(SyncError::codec(format!(
                "object field '{MODIFIED_FIELD}' clashes with the timestamp column"
            )));
        }
        record.insert(MODIFIED_FIELD.to_owned(), FieldValue::from(metadata.modified));
        Ok(record)
    }

    fn from_record(&self, record: &Record) -> SyncResult<Metadata<T>> {
        let modified = integer_field(record, MODIFIED_FIELD).unwrap_or(0);
        let fields: serde_json::Map<String, FieldValue> = record
            .iter()
            .filter(|(name, _)| name.as_str() != MODIFIED_FIELD)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let object = serde_json::from_value(FieldValue::Object(fields))
            .map_err(|e| SyncError::codec(e.to_string()))?;
        Ok(Metadata::new(object, modified))
    }
}
