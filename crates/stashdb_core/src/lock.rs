//! Per-id locking.

use crate::config::LockStrategy;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::HashMap;
use std::sync::Arc;

/// A "synchronize on this identifier" primitive.
///
/// With [`LockStrategy::Serialized`] every call on the same id is fully
/// serialized while different ids never contend. Locks are reentrant, so a
/// thread already holding an id may lock it again. Entries are dropped from
/// the lock table as soon as nobody holds or waits on them.
///
/// With [`LockStrategy::Concurrent`] the closure runs without any locking.
pub struct IdLock {
    strategy: LockStrategy,
    locks: Mutex<HashMap<String, Arc<ReentrantMutex<()>>>>,
}

impl IdLock {
    /// Creates a lock with the given strategy.
    pub fn new(strategy: LockStrategy) -> Self {
        Self {
            strategy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the strategy in use.
    pub fn strategy(&self) -> LockStrategy {
        self.strategy
    }

    /// Runs `f` while holding the lock for `id`.
    pub fn synchronized_on<R>(&self, id: &str, f: impl FnOnce() -> R) -> R {
        if self.strategy == LockStrategy::Concurrent {
            return f();
        }

        let entry = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(id.to_owned())
                    .or_insert_with(|| Arc::new(ReentrantMutex::new(()))),
            )
        };

        let result = {
            let _guard = entry.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // the table and this call are the only holders left
        if Arc::strong_count(&entry) == 2 {
            locks.remove(id);
        }
        result
    }

    /// Returns the number of ids currently locked or waited on.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Default for IdLock {
    fn default() -> Self {
        Self::new(LockStrategy::default())
    }
}

impl std::fmt::Debug for IdLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdLock")
            .field("strategy", &self.strategy)
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_is_reentrant() {
        let lock = IdLock::new(LockStrategy::Serialized);
        let value = lock.synchronized_on("a", || lock.synchronized_on("a", || 42));
        assert_eq!(value, 42);
        assert_eq!(lock.active(), 0);
    }

    #[test]
    fn same_id_is_serialized() {
        let lock = Arc::new(IdLock::new(LockStrategy::Serialized));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        lock.synchronized_on("same", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_micros(50));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.active(), 0);
    }

    #[test]
    fn different_ids_do_not_contend() {
        let lock = Arc::new(IdLock::new(LockStrategy::Serialized));
        let lock2 = Arc::clone(&lock);

        lock.synchronized_on("a", || {
            // would deadlock if "b" shared a lock with "a"
            let handle = thread::spawn(move || lock2.synchronized_on("b", || 1));
            assert_eq!(handle.join().unwrap(), 1);
        });
    }

    #[test]
    fn concurrent_strategy_does_not_track_ids() {
        let lock = IdLock::new(LockStrategy::Concurrent);
        lock.synchronized_on("a", || assert_eq!(lock.active(), 0));
    }
}
