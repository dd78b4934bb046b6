//! Table-level entry points.

use crate::batcher::MutationBatcher;
use crate::bulk::{async_bulk_apply, AsyncBulkApply, FailedMutation};
use crate::completion_queue::{PendingOp, SharedQueue};
use crate::config::{BatcherConfig, ClientConfig};
use crate::error::OperationError;
use crate::policy::{MutationPolicies, SafeIdempotentMutationPolicy};
use crate::retry::{async_retry_unary, AsyncRetryOperation};
use crate::transport::MutationTransport;
use std::fmt;
use std::sync::Arc;
use stratus_protocol::{MutateRowRequest, RowMutation};
use tracing::debug;

struct TableInner {
    cq: SharedQueue,
    transport: Arc<dyn MutationTransport>,
    config: ClientConfig,
    policies: MutationPolicies,
}

/// Handle to one table.
///
/// Cheap to clone. All operations run on the completion queue supplied at
/// construction.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

impl Table {
    /// Creates a table client using the policies described by `config`.
    pub fn new(cq: SharedQueue, transport: Arc<dyn MutationTransport>, config: ClientConfig) -> Self {
        let policies = MutationPolicies::new(
            config.retry.retry_policy(),
            config.retry.backoff_policy(),
            Box::new(SafeIdempotentMutationPolicy),
        );
        Self::with_policies(cq, transport, config, policies)
    }

    /// Creates a table client with explicit policy templates.
    pub fn with_policies(
        cq: SharedQueue,
        transport: Arc<dyn MutationTransport>,
        config: ClientConfig,
        policies: MutationPolicies,
    ) -> Self {
        Self {
            inner: Arc::new(TableInner {
                cq,
                transport,
                config,
                policies,
            }),
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.inner.config.table
    }

    /// Policy templates in use.
    pub fn policies(&self) -> &MutationPolicies {
        &self.inner.policies
    }

    /// Applies one row mutation, retrying transient failures if the
    /// mutation is idempotent.
    pub fn apply(&self, mutation: RowMutation) -> PendingOp<(), OperationError> {
        let idempotency = self.inner.policies.idempotency.idempotency(&mutation);
        let request = MutateRowRequest::new(self.name(), mutation);
        let transport = Arc::clone(&self.inner.transport);
        async_retry_unary(
            "apply",
            self.inner.policies.fresh_retry(),
            self.inner.policies.fresh_backoff(),
            idempotency,
            request,
            move |cq: &SharedQueue, request: &MutateRowRequest| {
                transport.mutate_row(cq, request.clone())
            },
        )
        .start(Arc::clone(&self.inner.cq))
    }

    /// Applies many row mutations, retrying only the entries that failed
    /// transiently and are idempotent.
    ///
    /// Resolves with the mutations that did not succeed, ordered by their
    /// position in `mutations`. An empty list resolves immediately.
    pub fn bulk_apply(
        &self,
        mutations: Vec<RowMutation>,
    ) -> PendingOp<Vec<FailedMutation>, OperationError> {
        if mutations.is_empty() {
            return PendingOp::ready(Ok(Vec::new()));
        }
        self.bulk_apply_operation(mutations)
            .start(Arc::clone(&self.inner.cq))
    }

    /// Builds, without starting, the retry operation behind
    /// [`Table::bulk_apply`], so callers can cancel it before it runs.
    pub fn bulk_apply_operation(
        &self,
        mutations: Vec<RowMutation>,
    ) -> AsyncRetryOperation<AsyncBulkApply> {
        debug!(table = self.name(), entries = mutations.len(), "bulk apply");
        async_bulk_apply(
            Arc::clone(&self.inner.transport),
            self.name(),
            mutations,
            self.inner.policies.fresh_retry(),
            self.inner.policies.fresh_backoff(),
            self.inner.policies.idempotency.as_ref(),
        )
    }

    /// Starts `operation` on this table's completion queue.
    pub fn start_bulk_apply(
        &self,
        operation: AsyncRetryOperation<AsyncBulkApply>,
    ) -> PendingOp<Vec<FailedMutation>, OperationError> {
        operation.start(Arc::clone(&self.inner.cq))
    }

    /// Creates a batcher for this table.
    pub fn mutation_batcher(&self, config: BatcherConfig) -> MutationBatcher {
        MutationBatcher::new(
            Arc::clone(&self.inner.cq),
            Arc::clone(&self.inner.transport),
            self.name(),
            config,
            self.inner.policies.clone(),
        )
    }

    /// Creates a batcher with the limits from the client configuration.
    pub fn default_batcher(&self) -> MutationBatcher {
        self.mutation_batcher(self.inner.config.batcher.clone())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("policies", &self.inner.policies)
            .finish_non_exhaustive()
    }
}
