//! Reshaping operation lists into backend-sized batches.
//!
//! Bulk backend calls typically cap the number of items, refuse updates
//! mixed with creates and deletes, and reject two writes to the same key.
//! [`BatchPacker`] reshapes an ordered operation list to satisfy all three
//! while keeping the original order:
//!
//! - every update becomes a batch of its own,
//! - creates and deletes are appended to the open batch unless it is full or
//!   was opened by an update,
//! - a batch holding a repeated key is split right before the repetition,
//!   again and again until no batch holds a duplicate.
//!
//! # Example
//!
//! ```rust
//! use stashdb_backend::{BatchPacker, Key, Operation, Record};
//!
//! let key = |v: &str| Key::new("beans", "id", v);
//! let batches = BatchPacker::pack(
//!     vec![
//!         Operation::create(key("1"), Record::new()),
//!         Operation::update(key("2"), Record::new()),
//!         Operation::create(key("3"), Record::new()),
//!         Operation::delete(key("3")),
//!     ],
//!     25,
//! );
//! let shapes: Vec<_> = batches.iter().map(ToString::to_string).collect();
//! assert_eq!(shapes, ["[1]", "[2]", "[3]", "[3]"]);
//! ```

use crate::key::Key;
use crate::operation::{Operation, OperationBatch};
use std::collections::HashSet;

/// Item cap of key-value backends.
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Incremental batch builder.
#[derive(Debug, Clone)]
pub struct BatchPacker {
    batch_size: usize,
    batches: Vec<OperationBatch>,
}

impl Default for BatchPacker {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchPacker {
    /// Creates a packer producing create/delete batches of at most
    /// `batch_size` operations (at least one).
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batches: Vec::new(),
        }
    }

    /// Packs `operations` in one go.
    pub fn pack(operations: impl IntoIterator<Item = Operation>, batch_size: usize) -> Vec<OperationBatch> {
        let mut packer = Self::new(batch_size);
        packer.add_operations(operations);
        packer.finish()
    }

    /// The configured cap.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Changes the cap for operations added from now on. Zero is ignored.
    pub fn set_batch_size(&mut self, batch_size: usize) {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
    }

    /// Appends one operation.
    pub fn add_operation(&mut self, operation: Operation) {
        if operation.is_update() {
            self.batches.push(OperationBatch::single_update(operation));
            return;
        }

        match self.batches.last_mut() {
            Some(open) if !open.is_single_update() && open.len() < self.batch_size => {
                open.push(operation);
            }
            _ => self
                .batches
                .push(OperationBatch::from_operations(vec![operation])),
        }
    }

    /// Appends operations in order.
    pub fn add_operations(&mut self, operations: impl IntoIterator<Item = Operation>) {
        for operation in operations {
            self.add_operation(operation);
        }
    }

    /// Number of batches built so far, before duplicate splitting.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Returns true if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Returns the batches with duplicate keys split apart.
    pub fn finish(self) -> Vec<OperationBatch> {
        split_duplicates(self.batches)
    }
}

/// Splits every batch right before the first repeated key until no batch
/// contains a key twice.
fn split_duplicates(batches: Vec<OperationBatch>) -> Vec<OperationBatch> {
    let mut packed = Vec::with_capacity(batches.len());
    for mut batch in batches {
        while let Some(at) = first_repeat(&batch) {
            let rest = batch.split_off(at);
            packed.push(batch);
            batch = rest;
        }
        packed.push(batch);
    }
    packed
}

fn first_repeat(batch: &OperationBatch) -> Option<usize> {
    let mut seen: HashSet<&Key> = HashSet::with_capacity(batch.len());
    batch
        .operations()
        .iter()
        .position(|op| !seen.insert(&op.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;
    use crate::value::Record;
    use proptest::prelude::*;

    fn op(label: &str) -> Operation {
        let kind = match &label[..1] {
            "C" => OperationKind::Create,
            "U" => OperationKind::Update,
            _ => OperationKind::Delete,
        };
        Operation::new(kind, Key::new("beans", "id", label), Record::new())
    }

    fn ops(labels: &[&str]) -> Vec<Operation> {
        labels.iter().map(|l| op(l)).collect()
    }

    fn shapes(batches: &[OperationBatch]) -> Vec<String> {
        batches.iter().map(ToString::to_string).collect()
    }

    const MIXED: [&str; 12] = [
        "C1", "C2", "U1", "C3", "U2", "D1", "C4", "D2", "D4", "U3", "U4", "U5",
    ];

    #[test]
    fn batch_size_one_gives_singletons() {
        let batches = BatchPacker::pack(ops(&MIXED), 1);
        assert_eq!(batches.len(), 12);
        let labels: Vec<String> = MIXED.iter().map(|l| format!("[{l}]")).collect();
        assert_eq!(shapes(&batches), labels);
    }

    #[test]
    fn batch_size_three() {
        let batches = BatchPacker::pack(ops(&MIXED), 3);
        assert_eq!(
            shapes(&batches),
            [
                "[C1, C2]",
                "[U1]",
                "[C3]",
                "[U2]",
                "[D1, C4, D2]",
                "[D4]",
                "[U3]",
                "[U4]",
                "[U5]"
            ]
        );
    }

    #[test]
    fn batch_size_six() {
        let batches = BatchPacker::pack(ops(&MIXED), 6);
        assert_eq!(
            shapes(&batches),
            [
                "[C1, C2]",
                "[U1]",
                "[C3]",
                "[U2]",
                "[D1, C4, D2, D4]",
                "[U3]",
                "[U4]",
                "[U5]"
            ]
        );
    }

    #[test]
    fn creates_and_deletes_fill_batches() {
        let labels = ["C1", "C2", "C3", "D1", "C4", "D2", "D4"];
        assert_eq!(
            shapes(&BatchPacker::pack(ops(&labels), 7)),
            ["[C1, C2, C3, D1, C4, D2, D4]"]
        );
        assert_eq!(
            shapes(&BatchPacker::pack(ops(&labels), 6)),
            ["[C1, C2, C3, D1, C4, D2]", "[D4]"]
        );
    }

    #[test]
    fn duplicates_split_repeatedly() {
        let key = |v: &str| Key::new("beans", "id", v);
        let operations = vec![
            Operation::create(key("a"), Record::new()),
            Operation::create(key("b"), Record::new()),
            Operation::delete(key("a")),
            Operation::create(key("a"), Record::new()),
            Operation::delete(key("b")),
        ];
        let batches = BatchPacker::pack(operations, 25);
        assert_eq!(shapes(&batches), ["[a, b]", "[a]", "[a, b]"]);
        assert_eq!(batches[1].operations()[0].kind, OperationKind::Delete);
    }

    #[test]
    fn same_value_in_other_table_is_not_a_duplicate() {
        let operations = vec![
            Operation::delete(Key::new("beans", "id", "1")),
            Operation::delete(Key::new("pods", "id", "1")),
        ];
        assert_eq!(BatchPacker::pack(operations, 25).len(), 1);
    }

    #[test]
    fn zero_batch_size_is_clamped_and_ignored() {
        let mut packer = BatchPacker::new(0);
        assert_eq!(packer.batch_size(), 1);
        packer.set_batch_size(0);
        assert_eq!(packer.batch_size(), 1);
        packer.set_batch_size(10);
        assert_eq!(packer.batch_size(), 10);
        assert!(packer.is_empty());
    }

    fn arb_operation() -> impl Strategy<Value = Operation> {
        (0u8..3, 0u8..8).prop_map(|(kind, id)| {
            let kind = match kind {
                0 => OperationKind::Create,
                1 => OperationKind::Update,
                _ => OperationKind::Delete,
            };
            Operation::new(kind, Key::new("beans", "id", id.to_string()), Record::new())
        })
    }

    proptest! {
        #[test]
        fn packed_batches_respect_constraints(
            operations in prop::collection::vec(arb_operation(), 0..60),
            batch_size in 1usize..10,
        ) {
            let batches = BatchPacker::pack(operations.clone(), batch_size);

            for batch in &batches {
                prop_assert!(!batch.is_empty());
                prop_assert!(first_repeat(batch).is_none());
                if batch.is_single_update() {
                    prop_assert_eq!(batch.len(), 1);
                    prop_assert!(batch.operations()[0].is_update());
                } else {
                    prop_assert!(batch.len() <= batch_size);
                    prop_assert!(batch.operations().iter().all(|op| !op.is_update()));
                }
            }

            let flattened: Vec<Operation> = batches
                .into_iter()
                .flat_map(OperationBatch::into_operations)
                .collect();
            prop_assert_eq!(flattened, operations);
        }
    }
}
