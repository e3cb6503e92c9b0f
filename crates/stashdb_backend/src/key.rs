//! Backend keys.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Key values longer than this are hashed before reaching the backend.
pub const MAX_KEY_VALUE_LEN: usize = 256;

/// Maps a logical key value to the value stored by the backend.
///
/// Values up to [`MAX_KEY_VALUE_LEN`] characters pass through unchanged;
/// longer values become the base64 encoded SHA-256 of their UTF-8 bytes.
pub fn physical_key_value(value: &str) -> String {
    if value.chars().count() <= MAX_KEY_VALUE_LEN {
        return value.to_owned();
    }
    STANDARD.encode(Sha256::digest(value.as_bytes()))
}

/// Addresses one record: table, key column and logical key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    /// Table (namespace) name.
    pub table: String,
    /// Name of the key column.
    pub column: String,
    /// Logical key value.
    pub value: String,
}

impl Key {
    /// Creates a key.
    pub fn new(table: impl Into<String>, column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            value: value.into(),
        }
    }

    /// The value the backend stores and looks up.
    pub fn physical_value(&self) -> String {
        physical_key_value(&self.value)
    }

    /// Returns true if the logical value is hashed on the way to the backend.
    pub fn is_hashed(&self) -> bool {
        self.value.chars().count() > MAX_KEY_VALUE_LEN
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={}", self.table, self.column, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_values_pass_through() {
        let key = Key::new("beans", "id", "abc");
        assert_eq!(key.physical_value(), "abc");
        assert!(!key.is_hashed());

        let edge = "x".repeat(MAX_KEY_VALUE_LEN);
        assert_eq!(physical_key_value(&edge), edge);
    }

    #[test]
    fn long_values_are_hashed_deterministically() {
        let long = "y".repeat(MAX_KEY_VALUE_LEN + 1);
        let first = physical_key_value(&long);
        assert_eq!(first, physical_key_value(&long));
        assert_eq!(first.len(), 44);
        assert_ne!(first, physical_key_value(&"z".repeat(300)));
        assert!(Key::new("t", "id", long).is_hashed());
    }

    #[test]
    fn display() {
        assert_eq!(Key::new("beans", "id", "1").to_string(), "beans.id=1");
    }
}
