//! Property-based test generators using proptest.

use proptest::prelude::*;
use stratus_protocol::{
    BulkMutationResponse, CellTimestamp, EntryStatus, Mutation, RowMutation, Status, StatusCode,
};

/// Strategy for short printable row keys.
pub fn row_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9#]{0,11}").expect("Invalid regex")
}

/// Strategy for any status code.
pub fn status_code_strategy() -> impl Strategy<Value = StatusCode> {
    (0u32..=16).prop_map(|code| StatusCode::from_code(code).expect("code in range"))
}

/// Strategy for the codes a bulk entry typically reports, weighted
/// towards success and transient failures.
pub fn entry_code_strategy() -> impl Strategy<Value = StatusCode> {
    prop_oneof![
        4 => Just(StatusCode::Ok),
        3 => Just(StatusCode::Unavailable),
        1 => Just(StatusCode::Aborted),
        1 => Just(StatusCode::DeadlineExceeded),
        1 => Just(StatusCode::PermissionDenied),
        1 => Just(StatusCode::InvalidArgument),
    ]
}

/// Strategy for one cell mutation, idempotent or not.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let family = prop::sample::select(vec!["cf", "meta", "stats"]);
    let column = prop::collection::vec(any::<u8>(), 1..8);
    prop_oneof![
        (family.clone(), column.clone(), any::<bool>(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(family, column, server_time, value)| Mutation::SetCell {
                family: family.to_string(),
                column: column.into(),
                timestamp: if server_time {
                    CellTimestamp::ServerAssigned
                } else {
                    CellTimestamp::Micros(1_000)
                },
                value: value.into(),
            }),
        (family.clone(), column.clone(), -100i64..100)
            .prop_map(|(family, column, delta)| Mutation::increment(family, column, delta)),
        (family.clone(), column).prop_map(|(family, column)| Mutation::delete_from_column(family, column)),
        family.prop_map(|family| Mutation::delete_from_family(family)),
        Just(Mutation::DeleteFromRow),
    ]
}

/// Strategy for a row mutation with at least one cell mutation.
pub fn row_mutation_strategy() -> impl Strategy<Value = RowMutation> {
    (row_key_strategy(), prop::collection::vec(mutation_strategy(), 1..4))
        .prop_map(|(key, mutations)| RowMutation::new(key, mutations))
}

/// Strategy for a bulk response to a request with `len` entries.
///
/// Entries may be missing, repeated or out of range, as a misbehaving
/// or interrupted stream would produce.
pub fn bulk_response_strategy(len: usize) -> impl Strategy<Value = BulkMutationResponse> {
    let index = 0..(len + 2);
    prop::collection::vec((index, entry_code_strategy()), 0..(len * 2 + 1)).prop_map(|entries| {
        BulkMutationResponse {
            entries: entries
                .into_iter()
                .map(|(index, code)| EntryStatus::new(index, Status::new(code, "generated")))
                .collect(),
        }
    })
}
