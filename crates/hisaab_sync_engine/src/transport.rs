//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use hisaab_sync_protocol::{PullQuery, PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A sync transport carries one request to the backend and returns its
/// envelope.
///
/// This trait abstracts the network layer so the client can run over HTTP,
/// an in-process server, or canned responses in tests. Implementations do
/// not retry and do not interpret the envelope's `status`; the
/// [`RemoteSyncClient`](crate::RemoteSyncClient) does both.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends a push batch to `endpoint` for the given business.
    async fn push(
        &self,
        endpoint: &str,
        business_id: &str,
        request: &PushRequest,
    ) -> SyncResult<PushResponse>;

    /// Fetches one pull page from `endpoint` for the given business.
    async fn pull(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> SyncResult<PullResponse>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn push(
        &self,
        endpoint: &str,
        business_id: &str,
        request: &PushRequest,
    ) -> SyncResult<PushResponse> {
        (**self).push(endpoint, business_id, request).await
    }

    async fn pull(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> SyncResult<PullResponse> {
        (**self).pull(endpoint, business_id, query).await
    }
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// A push.
    Push {
        /// Endpoint path.
        endpoint: String,
        /// Business the push was scoped to.
        business_id: String,
        /// Request body.
        request: PushRequest,
    },
    /// A pull.
    Pull {
        /// Endpoint path.
        endpoint: String,
        /// Business the pull was scoped to.
        business_id: String,
        /// Query parameters.
        query: PullQuery,
    },
}

/// A mock transport for testing.
///
/// Replies are queued and handed out in order. An empty queue yields a
/// protocol error.
#[derive(Debug, Default)]
pub struct MockTransport {
    push_replies: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_replies: Mutex<VecDeque<SyncResult<PullResponse>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next push reply.
    pub fn queue_push(&self, reply: SyncResult<PushResponse>) {
        self.push_replies.lock().push_back(reply);
    }

    /// Queues the next pull reply.
    pub fn queue_pull(&self, reply: SyncResult<PullResponse>) {
        self.pull_replies.lock().push_back(reply);
    }

    /// Returns every request seen so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of requests seen so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn push(
        &self,
        endpoint: &str,
        business_id: &str,
        request: &PushRequest,
    ) -> SyncResult<PushResponse> {
        self.calls.lock().push(MockCall::Push {
            endpoint: endpoint.to_string(),
            business_id: business_id.to_string(),
            request: request.clone(),
        });
        self.push_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("No mock push response set".into())))
    }

    async fn pull(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> SyncResult<PullResponse> {
        self.calls.lock().push(MockCall::Pull {
            endpoint: endpoint.to_string(),
            business_id: business_id.to_string(),
            query: query.clone(),
        });
        self.pull_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("No mock pull response set".into())))
    }
}
