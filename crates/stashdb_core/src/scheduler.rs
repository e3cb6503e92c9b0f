//! Fixed-delay background tasks.

use crate::error::StoreResult;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

enum Signal {
    Trigger,
    Stop,
}

/// A task run on a dedicated thread with a fixed delay between runs.
///
/// Runs never overlap. A panicking run is logged and the schedule continues.
/// Dropping the handle cancels the task and waits for an in-flight run.
pub struct Scheduled {
    name: String,
    control: Sender<Signal>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduled {
    /// Spawns `task`, first run after `initial_delay`, then `delay` after
    /// each completed run.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn with_fixed_delay<F>(
        name: impl Into<String>,
        initial_delay: Duration,
        delay: Duration,
        mut task: F,
    ) -> StoreResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (control, signals) = mpsc::channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stopped);
        let task_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let mut wait = initial_delay;
            loop {
                match signals.recv_timeout(wait) {
                    Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(Signal::Trigger) | Err(RecvTimeoutError::Timeout) => {}
                }
                if stop_flag.load(Ordering::Acquire) {
                    break;
                }
                if panic::catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                    error!(task = %task_name, "scheduled task panicked");
                }
                wait = delay;
            }
            debug!(task = %task_name, "scheduled task stopped");
        })?;

        Ok(Self {
            name,
            control,
            stopped,
            handle: Some(handle),
        })
    }

    /// Requests an extra run as soon as the current one (if any) completes.
    pub fn trigger_now(&self) {
        let _ = self.control.send(Signal::Trigger);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the schedule and waits for an in-flight run to finish.
    ///
    /// Called from the task itself, it stops the schedule without waiting.
    pub fn cancel(&mut self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.control.send(Signal::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(task = %self.name, "scheduled task thread panicked");
            }
        }
    }
}

impl Drop for Scheduled {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Scheduled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduled")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_for(limit: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn runs_repeatedly() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut scheduled = Scheduled::with_fixed_delay(
            "test-repeat",
            Duration::from_millis(1),
            Duration::from_millis(5),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= 3));
        scheduled.cancel();
        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn trigger_runs_before_delay() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let scheduled = Scheduled::with_fixed_delay(
            "test-trigger",
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        scheduled.trigger_now();
        assert!(wait_for(Duration::from_secs(5), || runs.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn panics_do_not_stop_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let _scheduled = Scheduled::with_fixed_delay(
            "test-panic",
            Duration::from_millis(1),
            Duration::from_millis(1),
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            },
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= 2));
    }
}
