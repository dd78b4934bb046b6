//! Transport abstraction.
//!
//! The client never talks to the network itself. A [`MutationTransport`]
//! turns a request into a [`PendingOp`] on the caller's completion queue;
//! everything above that (retries, merging, batching) is transport-agnostic.

use crate::completion_queue::{PendingOp, SharedQueue};
use parking_lot::Mutex;
use std::collections::VecDeque;
use stratus_protocol::{BulkMutationRequest, BulkMutationResponse, MutateRowRequest, Status};

/// Remote endpoint accepting mutations.
///
/// Returning `Err` from either method means the call could not be started
/// and nothing reached the server.
pub trait MutationTransport: Send + Sync + 'static {
    /// Applies one row mutation.
    fn mutate_row(
        &self,
        cq: &SharedQueue,
        request: MutateRowRequest,
    ) -> Result<PendingOp<()>, Status>;

    /// Applies many row mutations, each with its own outcome.
    fn mutate_rows(
        &self,
        cq: &SharedQueue,
        request: BulkMutationRequest,
    ) -> Result<PendingOp<BulkMutationResponse>, Status>;
}

/// Scripted reply for [`MockTransport::mutate_rows`].
#[derive(Debug, Clone)]
pub enum BulkReply {
    /// The call completes with this response.
    Response(BulkMutationResponse),
    /// The call fails as a whole.
    Fail(Status),
    /// The call cannot be started.
    Refuse(Status),
}

/// Transport double that replays scripted replies and records requests.
///
/// When the script runs out, unary calls succeed and bulk calls report
/// success for every entry.
#[derive(Debug, Default)]
pub struct MockTransport {
    unary_replies: Mutex<VecDeque<Result<(), Status>>>,
    bulk_replies: Mutex<VecDeque<BulkReply>>,
    unary_requests: Mutex<Vec<MutateRowRequest>>,
    bulk_requests: Mutex<Vec<BulkMutationRequest>>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next unary call.
    pub fn push_unary(&self, reply: Result<(), Status>) {
        self.unary_replies.lock().push_back(reply);
    }

    /// Queues the reply to the next bulk call.
    pub fn push_bulk(&self, reply: BulkReply) {
        self.bulk_replies.lock().push_back(reply);
    }

    /// Unary requests received so far.
    pub fn unary_requests(&self) -> Vec<MutateRowRequest> {
        self.unary_requests.lock().clone()
    }

    /// Bulk requests received so far.
    pub fn bulk_requests(&self) -> Vec<BulkMutationRequest> {
        self.bulk_requests.lock().clone()
    }
}

impl MutationTransport for MockTransport {
    fn mutate_row(
        &self,
        _cq: &SharedQueue,
        request: MutateRowRequest,
    ) -> Result<PendingOp<()>, Status> {
        self.unary_requests.lock().push(request);
        let reply = self.unary_replies.lock().pop_front().unwrap_or(Ok(()));
        Ok(PendingOp::ready(reply))
    }

    fn mutate_rows(
        &self,
        _cq: &SharedQueue,
        request: BulkMutationRequest,
    ) -> Result<PendingOp<BulkMutationResponse>, Status> {
        let len = request.len();
        self.bulk_requests.lock().push(request);
        let reply = self
            .bulk_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| BulkReply::Response(BulkMutationResponse::all_ok(len)));
        match reply {
            BulkReply::Response(response) => Ok(PendingOp::ready(Ok(response))),
            BulkReply::Fail(status) => Ok(PendingOp::ready(Err(status))),
            BulkReply::Refuse(status) => Err(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_queue::ManualCompletionQueue;
    use std::sync::Arc;
    use stratus_protocol::{Mutation, RowMutation};

    fn request(keys: &[&str]) -> BulkMutationRequest {
        BulkMutationRequest::new(
            "t",
            keys.iter()
                .map(|k| RowMutation::new(k.to_string(), vec![Mutation::DeleteFromRow]))
                .collect(),
        )
    }

    #[tokio::test]
    async fn replies_follow_the_script_then_default_to_success() {
        let cq: SharedQueue = Arc::new(ManualCompletionQueue::new());
        let transport = MockTransport::new();
        transport.push_bulk(BulkReply::Fail(Status::unavailable("down")));
        transport.push_bulk(BulkReply::Refuse(Status::internal("no channel")));

        let first = transport.mutate_rows(&cq, request(&["a"])).unwrap();
        assert!(first.await.is_err());
        assert!(transport.mutate_rows(&cq, request(&["a"])).is_err());

        let third = transport.mutate_rows(&cq, request(&["a", "b"])).unwrap();
        assert_eq!(third.await.unwrap(), BulkMutationResponse::all_ok(2));
        assert_eq!(transport.bulk_requests().len(), 3);
    }

    #[tokio::test]
    async fn unary_requests_are_recorded() {
        let cq: SharedQueue = Arc::new(ManualCompletionQueue::new());
        let transport = MockTransport::new();
        transport.push_unary(Err(Status::permission_denied("no")));

        let row = RowMutation::new("r", vec![Mutation::DeleteFromRow]);
        let pending = transport
            .mutate_row(&cq, MutateRowRequest::new("t", row.clone()))
            .unwrap();
        assert!(pending.await.is_err());
        assert_eq!(transport.unary_requests()[0].row, row);
    }
}
