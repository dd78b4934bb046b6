//! Request and response messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::mutation::RowMutation;
use crate::status::Status;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn encode_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(ProtocolError::encoding)?;
    Ok(buf)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(ProtocolError::decoding)
}

/// Request to apply a single row mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateRowRequest {
    /// Target table.
    pub table: String,
    /// The row change.
    pub row: RowMutation,
}

impl MutateRowRequest {
    /// Creates a new request.
    pub fn new(table: impl Into<String>, row: RowMutation) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Request carrying many independent row mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMutationRequest {
    /// Target table.
    pub table: String,
    /// Entries; each has its own outcome.
    pub entries: Vec<RowMutation>,
}

impl BulkMutationRequest {
    /// Creates a new request.
    pub fn new(table: impl Into<String>, entries: Vec<RowMutation>) -> Self {
        Self {
            table: table.into(),
            entries,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the request has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated encoded size of all entries.
    pub fn wire_size(&self) -> usize {
        self.entries.iter().map(RowMutation::wire_size).sum()
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Outcome of one entry of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStatus {
    /// Position of the entry in the request that produced this response.
    pub index: usize,
    /// Outcome of that entry.
    pub status: Status,
}

impl EntryStatus {
    /// Creates an entry outcome.
    pub fn new(index: usize, status: Status) -> Self {
        Self { index, status }
    }
}

/// Per-entry outcomes of a bulk request.
///
/// A response may be partial: entries missing from it are in an
/// undetermined state (the stream ended before they were reported).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMutationResponse {
    /// Reported outcomes, in the order the server produced them.
    pub entries: Vec<EntryStatus>,
}

impl BulkMutationResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a response reporting success for entries `0..len`.
    pub fn all_ok(len: usize) -> Self {
        Self {
            entries: (0..len).map(|i| EntryStatus::new(i, Status::ok())).collect(),
        }
    }

    /// Appends one entry outcome.
    pub fn with_entry(mut self, index: usize, status: Status) -> Self {
        self.entries.push(EntryStatus::new(index, status));
        self
    }

    /// Checks that every reported index refers to an entry of a request
    /// with `request_len` entries.
    pub fn validate(&self, request_len: usize) -> ProtocolResult<()> {
        match self.entries.iter().find(|e| e.index >= request_len) {
            Some(entry) => Err(ProtocolError::IndexOutOfRange {
                index: entry.index,
                len: request_len,
            }),
            None => Ok(()),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Mutation;
    use crate::status::StatusCode;

    fn row(key: &str) -> RowMutation {
        RowMutation::new(key.to_string(), vec![Mutation::set_cell("cf", "c", 7, "v")])
    }

    #[test]
    fn bulk_request_roundtrip() {
        let request = BulkMutationRequest::new(
            "projects/p/tables/t",
            vec![
                row("a"),
                RowMutation::new("b", vec![Mutation::increment("cf", "n", -3)]),
                RowMutation::new("c", vec![Mutation::DeleteFromRow]),
            ],
        );

        let bytes = request.encode().unwrap();
        let decoded = BulkMutationRequest::decode(&bytes).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn bulk_response_roundtrip_preserves_codes() {
        let response = BulkMutationResponse::new()
            .with_entry(1, Status::unavailable("later"))
            .with_entry(0, Status::ok());

        let decoded = BulkMutationResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.entries[0].index, 1);
        assert_eq!(decoded.entries[0].status.code, StatusCode::Unavailable);
        assert!(decoded.entries[1].status.is_ok());
    }

    #[test]
    fn decode_garbage_fails() {
        let result = BulkMutationResponse::decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::DecodingFailed { .. })));
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let response = BulkMutationResponse::all_ok(2).with_entry(5, Status::ok());
        assert_eq!(
            response.validate(2),
            Err(ProtocolError::IndexOutOfRange { index: 5, len: 2 })
        );
        assert!(BulkMutationResponse::all_ok(2).validate(2).is_ok());
    }

    #[test]
    fn wire_size_sums_entries() {
        let request = BulkMutationRequest::new("t", vec![row("a"), row("bb")]);
        assert_eq!(
            request.wire_size(),
            row("a").wire_size() + row("bb").wire_size()
        );
    }
}
