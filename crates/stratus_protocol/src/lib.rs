//! # Stratus Protocol
//!
//! Wire types for the Stratus mutation client.
//!
//! This crate provides:
//! - `Status` and `StatusCode`, the outcome of every remote call
//! - `Mutation` and `RowMutation`, the unit of a write
//! - Bulk request/response messages with per-entry outcomes
//! - CBOR encoding/decoding and wire-size estimation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod messages;
mod mutation;
mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{BulkMutationRequest, BulkMutationResponse, EntryStatus, MutateRowRequest};
pub use mutation::{CellTimestamp, Mutation, RowMutation};
pub use status::{Status, StatusCode};
