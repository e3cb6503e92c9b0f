//! Store and replication configuration.

use std::time::Duration;

/// How structural mutations on a single id are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockStrategy {
    /// No locking at all. Suitable for single-writer setups that accept benign races.
    Concurrent,
    /// Every mutation on an id holds a lock scoped to that id.
    #[default]
    Serialized,
}

/// Configuration for a [`crate::Replicator`].
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Fixed delay between two replication cycles.
    pub interval: Duration,
    /// Safety margin subtracted from a cycle's start time to form the next watermark.
    pub safe_modification_time: Duration,
    /// Number of entries requested from the master per page.
    pub page_size: usize,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            safe_modification_time: Duration::from_secs(1),
            page_size: 1000,
        }
    }
}

impl ReplicatorConfig {
    /// Creates a configuration with the given replication interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Sets the safe modification time.
    #[must_use]
    pub const fn with_safe_modification_time(mut self, value: Duration) -> Self {
        self.safe_modification_time = value;
        self
    }

    /// Sets the page size. Zero is bumped to one.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}
