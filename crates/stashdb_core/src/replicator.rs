//! Master/slave replication between stores.
//!
//! A [`Replicator`] keeps a slave [`VersionedStore`] converging to a
//! [`ReplicationMaster`]. Each cycle pulls everything the master modified
//! since the last watermark, installs entries that actually changed, and
//! permanently removes slave entries the master no longer knows.
//!
//! The watermark of a successful cycle is its start time minus
//! [`ReplicatorConfig::safe_modification_time`], so entries stamped while a
//! cycle was running are seen again by the next one. Re-delivered entries
//! that look unmodified are skipped without notification.

use crate::clock::now_millis;
use crate::config::ReplicatorConfig;
use crate::error::StoreResult;
use crate::listener::IdObject;
use crate::metadata::{Metadata, StoredObject};
use crate::scheduler::Scheduled;
use crate::store::{PageCursor, VersionedStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// The read side a replicator pulls from.
pub trait ReplicationMaster<T>: Send + Sync {
    /// Up to `limit` live entries modified strictly after `since`, keyed by
    /// id and ordered by `(modified, id)`, starting past `after`.
    ///
    /// # Errors
    ///
    /// Transient errors make the replicator skip the cycle.
    fn updated_since(
        &self,
        since: i64,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Metadata<T>)>>;

    /// Ids of every live entry.
    ///
    /// # Errors
    ///
    /// Transient errors make the replicator skip the cycle.
    fn ids(&self) -> StoreResult<HashSet<String>>;
}

impl<T: StoredObject> ReplicationMaster<T> for VersionedStore<T> {
    fn updated_since(
        &self,
        since: i64,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Metadata<T>)>> {
        Ok(VersionedStore::updated_since(self, since, after, limit))
    }

    fn ids(&self) -> StoreResult<HashSet<String>> {
        Ok(VersionedStore::ids(self).into_iter().collect())
    }
}

/// Outcome of one replication cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Entries new to the slave.
    pub added: usize,
    /// Entries replaced on the slave.
    pub updated: usize,
    /// Entries removed from the slave.
    pub deleted: usize,
    /// Re-delivered entries that were already up to date.
    pub unchanged: usize,
    /// True if the cycle was abandoned on a transient master error.
    pub skipped: bool,
}

struct Shared<T> {
    slave: Arc<VersionedStore<T>>,
    master: Arc<dyn ReplicationMaster<T>>,
    config: ReplicatorConfig,
    last_synced: Mutex<i64>,
}

/// Periodically replicates a master into a slave store.
pub struct Replicator<T> {
    shared: Arc<Shared<T>>,
    scheduled: Mutex<Option<Scheduled>>,
}

impl<T: StoredObject> Replicator<T> {
    /// Creates an idle replicator. Use [`replicate_now`](Self::replicate_now)
    /// or [`start`](Self::start) to run cycles.
    pub fn new(
        slave: Arc<VersionedStore<T>>,
        master: Arc<dyn ReplicationMaster<T>>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                slave,
                master,
                config,
                last_synced: Mutex::new(-1),
            }),
            scheduled: Mutex::new(None),
        }
    }

    /// Schedules cycles at the configured interval, the first one immediately.
    ///
    /// Calling `start` on a running replicator does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the replication thread cannot be spawned.
    pub fn start(&self) -> StoreResult<()> {
        let mut scheduled = self.scheduled.lock();
        if scheduled.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        *scheduled = Some(Scheduled::with_fixed_delay(
            "stashdb-replicator",
            std::time::Duration::ZERO,
            self.shared.config.interval,
            move || {
                if let Err(e) = shared.replicate() {
                    error!(error = %e, "replication cycle failed");
                }
            },
        )?);
        debug!(interval = ?self.shared.config.interval, "replicator started");
        Ok(())
    }

    /// Runs one cycle on the calling thread.
    ///
    /// Transient master errors are logged and reported through
    /// [`ReplicationReport::skipped`]; the watermark is left untouched.
    ///
    /// # Errors
    ///
    /// Returns non-transient master errors.
    pub fn replicate_now(&self) -> StoreResult<ReplicationReport> {
        self.shared.replicate()
    }

    /// The current watermark; `-1` before the first successful cycle.
    pub fn last_synced(&self) -> i64 {
        *self.shared.last_synced.lock()
    }

    /// Stops scheduled cycles and waits for a running one.
    pub fn close(&self) {
        if let Some(mut scheduled) = self.scheduled.lock().take() {
            scheduled.cancel();
            debug!("replicator stopped");
        }
    }
}

impl<T> Drop for Replicator<T> {
    fn drop(&mut self) {
        if let Some(mut scheduled) = self.scheduled.lock().take() {
            scheduled.cancel();
        }
    }
}

impl<T: StoredObject> Shared<T> {
    fn replicate(&self) -> StoreResult<ReplicationReport> {
        // held for the whole cycle so cycles never overlap
        let mut last_synced = self.last_synced.lock();
        let started = now_millis();
        let since = *last_synced;

        let pulled = match self.pull(since) {
            Ok(pulled) => pulled,
            Err(e) if e.is_transient() => {
                error!(error = %e, since, "failed to pull updates from master, skipping cycle");
                return Ok(ReplicationReport {
                    skipped: true,
                    ..ReplicationReport::default()
                });
            }
            Err(e) => return Err(e),
        };

        let mut report = ReplicationReport::default();
        let mut added = Vec::new();
        let mut updated = Vec::new();
        for entry in pulled {
            let Some(id) = self.slave.identifier().get(&entry.object) else {
                warn!(?entry, "master entry has no id, ignoring");
                continue;
            };
            let unchanged = self
                .slave
                .metadata(&id)
                .is_some_and(|local| local.looks_unmodified(&entry));
            if unchanged {
                trace!(%id, "entry unchanged");
                report.unchanged += 1;
                continue;
            }

            let object = entry.object.clone();
            self.slave.clock().observe(entry.modified);
            let is_new = self
                .slave
                .id_lock()
                .synchronized_on(&id, || self.slave.put_metadata(&id, entry));
            if is_new {
                added.push(IdObject::new(id, object));
            } else {
                updated.push(IdObject::new(id, object));
            }
        }
        report.added = added.len();
        report.updated = updated.len();
        self.slave.fire_added(added);
        self.slave.fire_updated(updated);

        let master_ids = match self.master.ids() {
            Ok(ids) => ids,
            Err(e) if e.is_transient() => {
                error!(error = %e, "failed to list master ids, skipping deletions");
                report.skipped = true;
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let deleted: Vec<_> = self
            .slave
            .ids()
            .into_iter()
            .filter(|id| !master_ids.contains(id))
            .filter_map(|id| {
                self.slave
                    .id_lock()
                    .synchronized_on(&id, || self.slave.remove_permanently(&id))
                    .map(|m| IdObject::new(id, m.object))
            })
            .collect();
        report.deleted = deleted.len();
        self.slave.fire_deleted(deleted);

        let margin = i64::try_from(self.config.safe_modification_time.as_millis()).unwrap_or(i64::MAX);
        *last_synced = started.saturating_sub(margin);
        debug!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            watermark = *last_synced,
            "replication cycle complete"
        );
        Ok(report)
    }

    fn pull(&self, since: i64) -> StoreResult<Vec<Metadata<T>>> {
        let page_size = self.config.page_size;
        let mut all = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.master.updated_since(since, cursor.as_ref(), page_size)?;
            let Some((id, last)) = page.last() else {
                return Ok(all);
            };
            cursor = Some(PageCursor::new(last.modified, id.clone()));
            all.extend(page.into_iter().map(|(_, entry)| entry));
        }
    }
}
