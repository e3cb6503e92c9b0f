//! Property-based test generators using proptest.

use crate::fixtures::{bean, Bean, BEAN_TABLE};
use proptest::prelude::*;
use stashdb_backend::{Key, Operation, OperationKind, Record};

/// Strategy for key values drawn from a small pool, so duplicates are common.
pub fn key_value_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("k{i}"))
}

/// Strategy for operation kinds.
pub fn operation_kind_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::Create),
        Just(OperationKind::Update),
        Just(OperationKind::Delete),
    ]
}

/// Strategy for one operation on [`BEAN_TABLE`].
pub fn operation_strategy(pool: usize) -> impl Strategy<Value = Operation> {
    (operation_kind_strategy(), key_value_strategy(pool))
        .prop_map(|(kind, value)| Operation::new(kind, Key::new(BEAN_TABLE, "id", value), Record::new()))
}

/// Strategy for operation lists of up to `max_len` operations.
pub fn operations_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(pool), 0..=max_len)
}

/// Strategy for create/delete-only operation lists.
pub fn bulk_operations_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    let kind = prop_oneof![Just(OperationKind::Create), Just(OperationKind::Delete)];
    prop::collection::vec(
        (kind, key_value_strategy(pool))
            .prop_map(|(kind, value)| Operation::new(kind, Key::new(BEAN_TABLE, "id", value), Record::new())),
        0..=max_len,
    )
}

/// Strategy for beans with ids from a small pool.
pub fn bean_strategy(pool: usize) -> impl Strategy<Value = Bean> {
    (
        key_value_strategy(pool),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        any::<i32>(),
    )
        .prop_map(|(id, origin, grams)| bean(&id, &origin, i64::from(grams)))
}

/// A store mutation.
#[derive(Debug, Clone)]
pub enum StoreAction {
    /// Store the bean.
    Store(Bean),
    /// Delete the id.
    Delete(String),
}

/// Strategy for sequences of store mutations.
pub fn store_actions_strategy(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<StoreAction>> {
    let action = prop_oneof![
        3 => bean_strategy(pool).prop_map(StoreAction::Store),
        1 => key_value_strategy(pool).prop_map(StoreAction::Delete),
    ];
    prop::collection::vec(action, 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_stay_in_pool(ops in operations_strategy(4, 20)) {
            for op in &ops {
                let index: usize = op.key.value[1..].parse().unwrap();
                prop_assert!(index < 4);
            }
        }

        #[test]
        fn bulk_lists_have_no_updates(ops in bulk_operations_strategy(4, 20)) {
            prop_assert!(ops.iter().all(|op| !op.is_update()));
        }
    }
}
