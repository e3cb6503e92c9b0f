//! Configuration for the sync engine.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration of one [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Backend table (or collection) name.
    pub table: String,
    /// Key column of the table.
    pub key_column: String,
    /// Fixed delay between flush cycles.
    pub flush_delay: Duration,
    /// Operations accumulated before a sub-batch is persisted.
    pub batch_size: usize,
    /// Whether to follow the backend's change feed.
    pub watch: bool,
    /// How long the watcher blocks waiting for a notification.
    pub watch_poll_interval: Duration,
    /// Directory receiving crash dumps, one subdirectory per table.
    pub crash_dump_dir: PathBuf,
    /// Resubmission policy for unprocessed batch items.
    pub unprocessed_retry: RetryConfig,
}

impl PersistenceConfig {
    /// Creates a configuration for `table` with defaults.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: "id".to_owned(),
            flush_delay: Duration::from_secs(1),
            batch_size: 100,
            watch: false,
            watch_poll_interval: Duration::from_millis(100),
            crash_dump_dir: PathBuf::from("/tmp/stashdb-crash-dump"),
            unprocessed_retry: RetryConfig::default(),
        }
    }

    /// Sets the key column.
    #[must_use]
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    /// Sets the flush delay.
    #[must_use]
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Sets the sub-batch size (at least one).
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enables or disables the change-feed watcher.
    #[must_use]
    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Sets the watcher poll interval.
    #[must_use]
    pub fn with_watch_poll_interval(mut self, interval: Duration) -> Self {
        self.watch_poll_interval = interval;
        self
    }

    /// Sets the crash-dump directory.
    #[must_use]
    pub fn with_crash_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.crash_dump_dir = dir.into();
        self
    }

    /// Sets the resubmission policy for unprocessed items.
    #[must_use]
    pub fn with_unprocessed_retry(mut self, retry: RetryConfig) -> Self {
        self.unprocessed_retry = retry;
        self
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::new("stash")
    }
}

/// Backoff policy between resubmissions.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of resubmissions.
    pub max_attempts: u32,
    /// Delay before the first resubmission.
    pub initial_delay: Duration,
    /// Upper bound of any delay, before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a policy with `max_attempts` resubmissions.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A policy that never resubmits.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Delay before resubmission `attempt`; zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        };
        if self.add_jitter {
            delay.mul_f64(1.0 + 0.25 * jitter_fraction())
        } else {
            delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// A value in `[0, 1)` derived from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    f64::from(nanos % 1024) / 1024.0
}
