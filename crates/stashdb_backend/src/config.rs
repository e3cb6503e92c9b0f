//! Backend configuration.

use std::collections::HashMap;

/// Per-table settings, handed to the client at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSettings {
    /// Name of the key column.
    pub key_column: String,
    /// Whether records are encrypted at rest.
    pub encrypted: bool,
    /// Key used for encryption at rest; `None` means the backend default key.
    pub kms_key_id: Option<String>,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            key_column: "id".to_owned(),
            encrypted: false,
            kms_key_id: None,
        }
    }
}

impl TableSettings {
    /// Default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key column.
    #[must_use]
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Enables encryption at rest, optionally with a specific key.
    #[must_use]
    pub fn with_encryption(mut self, kms_key_id: Option<String>) -> Self {
        self.encrypted = true;
        self.kms_key_id = kms_key_id;
        self
    }
}

/// Configuration of a backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// How often unprocessed batch items are resubmitted.
    pub max_error_retries: u32,
    /// Settings of known tables.
    pub tables: HashMap<String, TableSettings>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_error_retries: 3,
            tables: HashMap::new(),
        }
    }
}

impl BackendConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resubmission bound for unprocessed items.
    #[must_use]
    pub fn with_max_error_retries(mut self, retries: u32) -> Self {
        self.max_error_retries = retries;
        self
    }

    /// Registers settings for a table.
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>, settings: TableSettings) -> Self {
        self.tables.insert(table.into(), settings);
        self
    }

    /// Settings of `table`, falling back to defaults.
    pub fn describe_table(&self, table: &str) -> TableSettings {
        self.tables.get(table).cloned().unwrap_or_default()
    }
}

/// Configuration of the optimistic-concurrency protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicUpdateConfig {
    /// Column holding the version counter.
    pub version_column: String,
    /// Attempts made by retrying updates before giving up.
    pub max_attempts: u32,
}

impl Default for AtomicUpdateConfig {
    fn default() -> Self {
        Self {
            version_column: "generation".to_owned(),
            max_attempts: 10,
        }
    }
}

impl AtomicUpdateConfig {
    /// Sets the version column.
    #[must_use]
    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.version_column = column.into();
        self
    }

    /// Sets the attempt bound (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BackendConfig::default();
        assert_eq!(config.max_error_retries, 3);
        assert_eq!(config.describe_table("beans").key_column, "id");

        let atomic = AtomicUpdateConfig::default();
        assert_eq!(atomic.version_column, "generation");
        assert_eq!(atomic.max_attempts, 10);
        assert_eq!(atomic.with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn describe_registered_table() {
        let config = BackendConfig::new().with_table(
            "beans",
            TableSettings::new()
                .with_key_column("bean_id")
                .with_encryption(Some("alias/beans".into())),
        );
        let settings = config.describe_table("beans");
        assert_eq!(settings.key_column, "bean_id");
        assert!(settings.encrypted);
        assert_eq!(settings.kms_key_id.as_deref(), Some("alias/beans"));
        assert!(!config.describe_table("other").encrypted);
    }
}
