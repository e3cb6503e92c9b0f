//! Write operations and batches.

use crate::key::Key;
use crate::value::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Write a whole record.
    Create,
    /// Write selected fields of a record.
    Update,
    /// Remove a record.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Outcome of an operation once its batch has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationState {
    /// Not executed yet.
    #[default]
    Pending,
    /// Accepted by the backend.
    Success,
    /// Still rejected after every resubmission.
    Error,
}

/// One write against one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// What to do.
    pub kind: OperationKind,
    /// Target key.
    pub key: Key,
    /// Field values; empty for deletes.
    pub fields: Record,
    /// Outcome, set after execution.
    pub state: OperationState,
}

impl Operation {
    /// Creates an operation of any kind.
    pub fn new(kind: OperationKind, key: Key, fields: Record) -> Self {
        Self {
            kind,
            key,
            fields,
            state: OperationState::Pending,
        }
    }

    /// Creates a create operation.
    pub fn create(key: Key, fields: Record) -> Self {
        Self::new(OperationKind::Create, key, fields)
    }

    /// Creates an update operation.
    pub fn update(key: Key, fields: Record) -> Self {
        Self::new(OperationKind::Update, key, fields)
    }

    /// Creates a delete operation.
    pub fn delete(key: Key) -> Self {
        Self::new(OperationKind::Delete, key, Record::new())
    }

    /// Returns true for updates.
    #[inline]
    pub fn is_update(&self) -> bool {
        self.kind == OperationKind::Update
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

/// Operations submitted to a backend in one call.
///
/// A batch flagged as a single update holds exactly one update operation;
/// every other batch holds creates and deletes only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationBatch {
    operations: Vec<Operation>,
    single_update: bool,
}

impl OperationBatch {
    /// Creates an empty create/delete batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a batch holding a single update.
    pub fn single_update(operation: Operation) -> Self {
        Self {
            operations: vec![operation],
            single_update: true,
        }
    }

    /// Creates a create/delete batch from operations.
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            single_update: false,
        }
    }

    /// Returns true if this batch is a single update.
    pub fn is_single_update(&self) -> bool {
        self.single_update
    }

    /// Appends an operation.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// The operations, in submission order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Mutable access, used to record outcomes.
    pub fn operations_mut(&mut self) -> &mut [Operation] {
        &mut self.operations
    }

    /// Consumes the batch.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// The last operation, if any.
    pub fn last(&self) -> Option<&Operation> {
        self.operations.last()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in the given state.
    pub fn in_state(&self, state: OperationState) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(move |op| op.state == state)
    }

    pub(crate) fn split_off(&mut self, at: usize) -> OperationBatch {
        OperationBatch {
            operations: self.operations.split_off(at),
            single_update: self.single_update,
        }
    }
}

impl fmt::Display for OperationBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&op.key.value)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> Key {
        Key::new("beans", "id", value)
    }

    #[test]
    fn constructors() {
        let op = Operation::delete(key("1"));
        assert_eq!(op.kind, OperationKind::Delete);
        assert!(op.fields.is_empty());
        assert_eq!(op.state, OperationState::Pending);
        assert!(Operation::update(key("1"), Record::new()).is_update());
        assert_eq!(op.to_string(), "Delete beans.id=1");
    }

    #[test]
    fn batch_display_lists_key_values() {
        let batch = OperationBatch::from_operations(vec![
            Operation::create(key("a"), Record::new()),
            Operation::delete(key("b")),
        ]);
        assert_eq!(batch.to_string(), "[a, b]");
        assert!(!batch.is_single_update());
    }

    #[test]
    fn state_filter() {
        let mut batch = OperationBatch::from_operations(vec![
            Operation::delete(key("a")),
            Operation::delete(key("b")),
        ]);
        batch.operations_mut()[1].state = OperationState::Error;
        let failed: Vec<_> = batch.in_state(OperationState::Error).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key.value, "b");
    }
}
