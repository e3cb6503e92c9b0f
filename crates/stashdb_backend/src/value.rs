//! Record representation.
//!
//! Records travel between the store and backends as ordered maps of field
//! name to JSON value. Objects are converted explicitly by a codec; nothing
//! here inspects their shape.

use std::collections::BTreeMap;

/// A single field value.
pub type FieldValue = serde_json::Value;

/// A backend record: field name to value.
pub type Record = BTreeMap<String, FieldValue>;

/// Reads an integer field, treating absent and `null` alike.
pub fn integer_field(record: &Record, field: &str) -> Option<i64> {
    record.get(field).and_then(FieldValue::as_i64)
}

/// Reads a string field.
pub fn string_field<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field).and_then(FieldValue::as_str)
}

/// Keeps only `fields`, or everything when `fields` is empty.
pub fn project(record: &Record, fields: &[&str]) -> Record {
    if fields.is_empty() {
        return record.clone();
    }
    record
        .iter()
        .filter(|(name, _)| fields.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
