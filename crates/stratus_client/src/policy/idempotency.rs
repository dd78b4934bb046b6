//! Idempotency predicates.

use std::fmt;
use stratus_protocol::RowMutation;

/// Whether a request may be resent after an attempt that reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Resending has the same net effect as sending once.
    Idempotent,
    /// Resending may apply the change twice.
    NonIdempotent,
}

impl Idempotency {
    /// Converts a predicate result.
    pub fn from_bool(idempotent: bool) -> Self {
        if idempotent {
            Idempotency::Idempotent
        } else {
            Idempotency::NonIdempotent
        }
    }

    /// Returns true for `Idempotent`.
    pub fn is_idempotent(self) -> bool {
        self == Idempotency::Idempotent
    }
}

/// Decides whether a request of type `R` is safe to retry.
pub trait IdempotencyPolicy<R: ?Sized>: Send + Sync + fmt::Debug {
    /// Returns a fresh copy.
    fn clone_box(&self) -> Box<dyn IdempotencyPolicy<R>>;

    /// Returns true if `request` may be resent.
    fn is_idempotent(&self, request: &R) -> bool;

    /// Classifies `request`.
    fn idempotency(&self, request: &R) -> Idempotency {
        Idempotency::from_bool(self.is_idempotent(request))
    }
}

impl<R: ?Sized + 'static> Clone for Box<dyn IdempotencyPolicy<R>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Treats a row mutation as idempotent unless it increments a counter or
/// lets the server pick a cell timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeIdempotentMutationPolicy;

impl IdempotencyPolicy<RowMutation> for SafeIdempotentMutationPolicy {
    fn clone_box(&self) -> Box<dyn IdempotencyPolicy<RowMutation>> {
        Box::new(*self)
    }

    fn is_idempotent(&self, request: &RowMutation) -> bool {
        request.is_idempotent()
    }
}

/// Treats every request as idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetryPolicy;

impl<R: ?Sized + 'static> IdempotencyPolicy<R> for AlwaysRetryPolicy {
    fn clone_box(&self) -> Box<dyn IdempotencyPolicy<R>> {
        Box::new(*self)
    }

    fn is_idempotent(&self, _request: &R) -> bool {
        true
    }
}
