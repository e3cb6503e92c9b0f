//! Batch execution with resubmission of unprocessed items.

use crate::client::BackendClient;
use crate::error::BackendResult;
use crate::key::Key;
use crate::operation::{OperationBatch, OperationState};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Totals of one or more batch writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Backend calls made, resubmissions included.
    pub calls: usize,
    /// Operations that ended in [`OperationState::Success`].
    pub applied: usize,
    /// Operations that ended in [`OperationState::Error`].
    pub failed: usize,
}

impl WriteSummary {
    fn absorb(&mut self, other: WriteSummary) {
        self.calls += other.calls;
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

type Backoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Submits packed batches to a backend table.
///
/// When the backend leaves items unprocessed, only those items are
/// resubmitted, up to `max_resubmits` times. Items still unprocessed after
/// that end in [`OperationState::Error`] on the batch itself; they are not
/// reported as an error of the call.
#[derive(Clone)]
pub struct BatchWriter {
    client: Arc<dyn BackendClient>,
    table: String,
    max_resubmits: u32,
    backoff: Backoff,
}

impl BatchWriter {
    /// Creates a writer using the client's configured retry bound and no delay.
    pub fn new(client: Arc<dyn BackendClient>, table: impl Into<String>) -> Self {
        let max_resubmits = client.config().max_error_retries;
        Self {
            client,
            table: table.into(),
            max_resubmits,
            backoff: Arc::new(|_| Duration::ZERO),
        }
    }

    /// Sets how often unprocessed items are resubmitted.
    #[must_use]
    pub fn with_max_resubmits(mut self, max_resubmits: u32) -> Self {
        self.max_resubmits = max_resubmits;
        self
    }

    /// Sets the pause before resubmission `n` (starting at 1).
    #[must_use]
    pub fn with_backoff(mut self, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// The target table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Executes one batch, recording each operation's outcome in place.
    ///
    /// # Errors
    ///
    /// Returns the backend error of any call that failed outright. Outcomes
    /// recorded before the failure stay on the batch.
    pub fn write(&self, batch: &mut OperationBatch) -> BackendResult<WriteSummary> {
        let mut summary = WriteSummary::default();
        if batch.is_empty() {
            return Ok(summary);
        }

        let mut pending = batch.clone();
        let mut resubmits = 0;
        loop {
            let outcome = self.client.execute_batch(&self.table, &pending)?;
            summary.calls += 1;
            mark(batch, &outcome.applied, OperationState::Success);

            if outcome.unprocessed.is_empty() {
                break;
            }
            if resubmits >= self.max_resubmits {
                let keys: Vec<Key> = outcome.unprocessed.iter().map(|op| op.key.clone()).collect();
                mark(batch, &keys, OperationState::Error);
                warn!(
                    table = %self.table,
                    unprocessed = keys.len(),
                    resubmits,
                    "giving up on unprocessed items"
                );
                break;
            }

            resubmits += 1;
            debug!(
                table = %self.table,
                unprocessed = outcome.unprocessed.len(),
                attempt = resubmits,
                "resubmitting unprocessed items"
            );
            let delay = (self.backoff)(resubmits);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            pending = if batch.is_single_update() {
                let mut ops = outcome.unprocessed;
                match ops.pop() {
                    Some(op) => OperationBatch::single_update(op),
                    None => break,
                }
            } else {
                OperationBatch::from_operations(outcome.unprocessed)
            };
        }

        for op in batch.operations_mut() {
            if op.state == OperationState::Pending {
                op.state = OperationState::Error;
            }
        }
        summary.applied = batch.in_state(OperationState::Success).count();
        summary.failed = batch.in_state(OperationState::Error).count();
        Ok(summary)
    }

    /// Executes batches in order, stopping at the first failed call.
    ///
    /// # Errors
    ///
    /// Returns the first backend error; later batches stay pending.
    pub fn write_all(&self, batches: &mut [OperationBatch]) -> BackendResult<WriteSummary> {
        let mut summary = WriteSummary::default();
        for batch in batches {
            summary.absorb(self.write(batch)?);
        }
        Ok(summary)
    }
}

fn mark(batch: &mut OperationBatch, keys: &[Key], state: OperationState) {
    if keys.is_empty() {
        return;
    }
    let keys: HashSet<&Key> = keys.iter().collect();
    for op in batch.operations_mut() {
        if keys.contains(&op.key) {
            op.state = state;
        }
    }
}

impl fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter")
            .field("backend", &self.client.name())
            .field("table", &self.table)
            .field("max_resubmits", &self.max_resubmits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KeyValueBackend;
    use crate::operation::Operation;
    use crate::packer::BatchPacker;
    use crate::value::Record;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(value: &str) -> Key {
        Key::new("beans", "id", value)
    }

    fn creates(n: usize) -> OperationBatch {
        OperationBatch::from_operations(
            (0..n)
                .map(|i| Operation::create(key(&i.to_string()), Record::new()))
                .collect(),
        )
    }

    #[test]
    fn complete_batch_is_one_call() {
        let backend = Arc::new(KeyValueBackend::new());
        let writer = BatchWriter::new(backend.clone(), "beans");
        let mut batch = creates(3);

        let summary = writer.write(&mut batch).unwrap();
        assert_eq!(summary, WriteSummary { calls: 1, applied: 3, failed: 0 });
        assert_eq!(backend.len("beans"), 3);
    }

    #[test]
    fn unprocessed_items_are_resubmitted() {
        let backend = Arc::new(KeyValueBackend::new());
        backend.faults().withhold_items(3);
        let waits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&waits);
        let writer = BatchWriter::new(backend.clone(), "beans").with_backoff(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        });

        let mut batch = creates(4);
        let summary = writer.write(&mut batch).unwrap();
        // three of four withheld on the first call, all accepted on resubmit
        assert_eq!(summary.calls, 2);
        assert_eq!(summary.applied, 4);
        assert_eq!(waits.load(Ordering::SeqCst), 1);
        assert_eq!(backend.len("beans"), 4);
    }

    #[test]
    fn exhausted_resubmits_mark_errors() {
        let backend = Arc::new(KeyValueBackend::new());
        backend.faults().withhold_items(100);
        let writer = BatchWriter::new(backend.clone(), "beans").with_max_resubmits(2);

        let mut batch = creates(2);
        let summary = writer.write(&mut batch).unwrap();
        assert_eq!(summary, WriteSummary { calls: 3, applied: 0, failed: 2 });
        assert!(batch
            .operations()
            .iter()
            .all(|op| op.state == OperationState::Error));
    }

    #[test]
    fn outright_failure_propagates() {
        let backend = Arc::new(KeyValueBackend::new());
        backend.faults().fail_batches(1);
        let writer = BatchWriter::new(backend.clone(), "beans");

        let mut batches = BatchPacker::pack(creates(2).into_operations(), 1);
        let err = writer.write_all(&mut batches).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(batches[0].operations()[0].state, OperationState::Pending);
        assert_eq!(batches[1].operations()[0].state, OperationState::Pending);
    }

    #[test]
    fn single_update_resubmission_keeps_flag() {
        let backend = Arc::new(KeyValueBackend::new());
        backend.faults().withhold_items(1);
        let writer = BatchWriter::new(backend.clone(), "beans");

        let mut batch = OperationBatch::single_update(Operation::update(key("u"), Record::new()));
        let summary = writer.write(&mut batch).unwrap();
        assert_eq!(summary.calls, 2);
        assert_eq!(summary.applied, 1);
    }
}
