//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a message to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Unknown numeric status code on the wire.
    #[error("unknown status code: {0}")]
    UnknownStatusCode(u32),

    /// Response entry refers to a position outside the request.
    #[error("entry index {index} out of range for request with {len} entries")]
    IndexOutOfRange {
        /// Index reported by the server.
        index: usize,
        /// Number of entries in the request.
        len: usize,
    },
}

impl ProtocolError {
    pub(crate) fn encoding(err: impl std::fmt::Display) -> Self {
        Self::EncodingFailed {
            message: err.to_string(),
        }
    }

    pub(crate) fn decoding(err: impl std::fmt::Display) -> Self {
        Self::DecodingFailed {
            message: err.to_string(),
        }
    }
}
