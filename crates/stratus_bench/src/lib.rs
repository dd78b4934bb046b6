//! Benchmark utilities.

use rand::Rng;
use stratus_protocol::{BulkMutationResponse, Mutation, RowMutation, Status, StatusCode};

/// Generate random cell data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` rows, every `increment_every`-th one a counter increment.
pub fn generate_rows(count: usize, payload_size: usize, increment_every: usize) -> Vec<RowMutation> {
    (0..count)
        .map(|i| {
            let key = format!("row{i:08}");
            let mutation = if increment_every > 0 && i % increment_every == 0 {
                Mutation::increment("cf", "n", 1)
            } else {
                Mutation::set_cell("cf", "c", 1_000, random_data(payload_size))
            };
            RowMutation::new(key, vec![mutation])
        })
        .collect()
}

/// A response for `len` entries where roughly `failure_ratio` of them fail
/// transiently.
pub fn mixed_response(len: usize, failure_ratio: f64) -> BulkMutationResponse {
    let mut rng = rand::thread_rng();
    (0..len).fold(BulkMutationResponse::new(), |response, index| {
        let status = if rng.gen_bool(failure_ratio) {
            Status::new(StatusCode::Unavailable, "busy")
        } else {
            Status::ok()
        };
        response.with_entry(index, status)
    })
}
