//! Change-feed follower thread.

use crate::error::SyncResult;
use stashdb_backend::{ChangeNotification, ChangeStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Delivers change notifications to a handler on a dedicated thread.
///
/// The thread wakes at least every `poll_interval` to observe
/// [`stop`](Self::stop). A closed feed ends the thread.
pub struct Watcher {
    name: String,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawns the follower.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<F>(name: impl Into<String>, stream: ChangeStream, poll_interval: Duration, mut handler: F) -> SyncResult<Self>
    where
        F: FnMut(ChangeNotification) + Send + 'static,
    {
        let name = name.into();
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopped);
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                match stream.recv_timeout(poll_interval) {
                    Ok(notification) => handler(notification),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!(watcher = %thread_name, "change feed closed");
                        break;
                    }
                }
            }
            debug!(watcher = %thread_name, "watcher stopped");
        })?;

        Ok(Self {
            name,
            stopped,
            handle: Some(handle),
        })
    }

    /// The thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the follower thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the follower and waits for the notification in flight.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(watcher = %self.name, "watcher thread panicked");
            }
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_backend::{ChangeKind, Key};
    use std::sync::mpsc;

    fn notification(id: &str) -> ChangeNotification {
        ChangeNotification {
            kind: ChangeKind::Insert,
            key: Key::new("beans", "id", id),
            new_image: None,
            old_image: None,
        }
    }

    #[test]
    fn delivers_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let (seen_tx, seen_rx) = mpsc::channel();
        let mut watcher = Watcher::spawn("watch-test", rx, Duration::from_millis(10), move |n| {
            let _ = seen_tx.send(n.key.value);
        })
        .unwrap();

        tx.send(notification("a")).unwrap();
        tx.send(notification("b")).unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "a");
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "b");

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn closed_feed_ends_thread() {
        let (tx, rx) = mpsc::channel::<ChangeNotification>();
        let watcher = Watcher::spawn("watch-closed", rx, Duration::from_millis(10), |_| {}).unwrap();
        drop(tx);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while watcher.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!watcher.is_running());
    }
}
