//! Optimistic-concurrency updates.
//!
//! A record carries a version counter in a dedicated column. An update
//! only applies when the stored counter is absent, `null` or equal to the
//! writer's expected value, and increments it in the same step. Writers
//! that lose the race get [`BackendError::VersionConflict`] and can re-read,
//! re-derive and try again with [`AtomicUpdateCoordinator::update_with_retry`].

use crate::client::{BackendClient, ConditionalWrite};
use crate::config::AtomicUpdateConfig;
use crate::error::{BackendError, BackendResult};
use crate::key::Key;
use crate::reserved::is_attribute_name_appropriate;
use crate::value::{integer_field, project, Record};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A successful versioned update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicUpdate {
    /// Version stored by the update.
    pub version: i64,
    /// Attempts it took, starting at 1.
    pub attempts: u32,
}

/// Issues conditional updates against one backend.
pub struct AtomicUpdateCoordinator {
    client: Arc<dyn BackendClient>,
    config: AtomicUpdateConfig,
}

impl AtomicUpdateCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ConstraintViolation`] if the version column is
    /// not an appropriate attribute name.
    pub fn new(client: Arc<dyn BackendClient>, config: AtomicUpdateConfig) -> BackendResult<Self> {
        if !is_attribute_name_appropriate(&config.version_column) {
            return Err(BackendError::constraint(format!(
                "inappropriate version column '{}'",
                config.version_column
            )));
        }
        Ok(Self { client, config })
    }

    /// The configuration in use.
    pub fn config(&self) -> &AtomicUpdateConfig {
        &self.config
    }

    /// Applies `writes` to `key` if its version equals `expected_version`.
    ///
    /// A negative expected version is treated as 0. The first update of a
    /// record without a version succeeds whatever is expected and stores
    /// version 1.
    ///
    /// # Errors
    ///
    /// - [`BackendError::ConstraintViolation`] if `writes` is empty, touches
    ///   the key or version column, or names an inappropriate attribute
    /// - [`BackendError::VersionConflict`] if the stored version differs
    pub fn update(&self, key: &Key, writes: Record, expected_version: i64) -> BackendResult<i64> {
        if writes.is_empty() {
            return Err(BackendError::constraint("no fields to update"));
        }
        for column in [&key.column, &self.config.version_column] {
            if writes.contains_key(column) {
                return Err(BackendError::constraint(format!(
                    "column '{column}' cannot be written by an atomic update"
                )));
            }
        }
        if let Some(field) = writes.keys().find(|f| !is_attribute_name_appropriate(f)) {
            return Err(BackendError::constraint(format!(
                "inappropriate attribute name '{field}'"
            )));
        }

        let write = ConditionalWrite {
            version_column: self.config.version_column.clone(),
            expected_version: expected_version.max(0),
            writes,
        };
        self.client.conditional_update(&key.table, key, &write)
    }

    /// Read-modify-write with retry on version conflicts.
    ///
    /// Each attempt reads the record, passes its fields restricted to
    /// `keys_to_preserve` (all fields when empty) to `derive`, and writes the
    /// result conditionally on the version just read. `expected_version_hint`
    /// is used when the stored record carries no version. Key and version
    /// columns returned by `derive` are ignored.
    ///
    /// `max_attempts` defaults to the configured bound.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::VersionConflict`] once attempts are exhausted,
    /// and any other error immediately.
    pub fn update_with_retry<F>(
        &self,
        key: &Key,
        keys_to_preserve: &[&str],
        mut derive: F,
        max_attempts: Option<u32>,
        expected_version_hint: Option<i64>,
    ) -> BackendResult<AtomicUpdate>
    where
        F: FnMut(&Record) -> Record,
    {
        let max_attempts = max_attempts.unwrap_or(self.config.max_attempts).max(1);
        let mut last_conflict = None;

        for attempt in 1..=max_attempts {
            let current = self.client.get_by_id(&key.table, key)?;
            let (values, version) = match &current {
                Some(record) => (
                    project(record, keys_to_preserve),
                    integer_field(record, &self.config.version_column),
                ),
                None => (Record::new(), None),
            };
            let expected = version.or(expected_version_hint).unwrap_or(0);

            let mut writes = derive(&values);
            writes.remove(&key.column);
            writes.remove(&self.config.version_column);

            match self.update(key, writes, expected) {
                Ok(version) => {
                    debug!(%key, version, attempt, "atomic update applied");
                    return Ok(AtomicUpdate {
                        version,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_version_conflict() => {
                    trace!(%key, attempt, "version conflict, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        warn!(%key, max_attempts, "atomic update gave up");
        Err(last_conflict
            .unwrap_or_else(|| BackendError::version_conflict(key.to_string(), 0, None)))
    }
}

impl std::fmt::Debug for AtomicUpdateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicUpdateCoordinator")
            .field("backend", &self.client.name())
            .field("config", &self.config)
            .finish()
    }
}
