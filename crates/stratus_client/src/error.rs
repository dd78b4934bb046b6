//! Error types for the client.

use stratus_protocol::{Status, StatusCode};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, OperationError>;

/// Terminal failure of an operation or of a single bulk entry.
///
/// Transient failures of idempotent requests are retried internally and
/// never surface here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// The caller cancelled the operation.
    #[error("{location}: operation cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        location: &'static str,
    },

    /// The status is not retryable.
    #[error("{location}: permanent error: {status}")]
    PermanentError {
        /// Operation that failed.
        location: &'static str,
        /// Last status observed.
        status: Status,
    },

    /// The retry budget ran out while the failures were still transient.
    #[error("{location}: too many transient errors: {status}")]
    TooManyTransientErrors {
        /// Operation that failed.
        location: &'static str,
        /// Last status observed.
        status: Status,
    },

    /// The request failed after being sent and is not safe to resend.
    #[error("{location}: non-idempotent request failed, not retried: {status}")]
    NonIdempotentFailure {
        /// Operation that failed.
        location: &'static str,
        /// Status of the failed attempt.
        status: Status,
    },

    /// The outcome of a non-idempotent bulk entry was never reported.
    #[error("mutation in undetermined state, not idempotent: {status}")]
    UndeterminedNonIdempotent {
        /// Status that ended the attempt.
        status: Status,
    },

    /// The bulk call itself failed before the entry's outcome was known.
    #[error("connection error before outcome was known: {status}")]
    ConnectionError {
        /// Status of the failed call.
        status: Status,
    },

    /// The mutation was refused at admission and never sent.
    #[error("mutation rejected: {status}")]
    Rejected {
        /// Reason for the rejection.
        status: Status,
    },
}

impl OperationError {
    /// Creates a rejection with an `InvalidArgument` status.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: Status::invalid_argument(message),
        }
    }

    /// Status code carried by this error.
    pub fn code(&self) -> StatusCode {
        match self {
            OperationError::Cancelled { .. } => StatusCode::Cancelled,
            OperationError::PermanentError { status, .. }
            | OperationError::TooManyTransientErrors { status, .. }
            | OperationError::NonIdempotentFailure { status, .. }
            | OperationError::UndeterminedNonIdempotent { status }
            | OperationError::ConnectionError { status }
            | OperationError::Rejected { status } => status.code,
        }
    }

    /// Terminal status: the underlying code with a message naming the
    /// failure class.
    pub fn status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }

    /// Returns true if the failure was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled { .. })
    }
}
