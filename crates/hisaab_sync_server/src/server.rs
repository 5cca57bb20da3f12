//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::{RecordStore, StoredRecord};
use hisaab_sync_protocol::{
    ApiEnvelope, EntityKind, Payload, PullQuery, PullResponse, PushRequest, PushResponse, Slug,
    Timestamp,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The sync server.
///
/// Routes push and pull requests by endpoint path to the kind served
/// there. It holds everything in memory and is meant to stand in for the
/// real backend in tests and demos.
///
/// # Example
///
/// ```
/// use hisaab_sync_server::{SyncServer, ServerConfig};
/// use hisaab_sync_protocol::{PullQuery, time::epoch};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server.pull_envelope("sync-product", "B1", &PullQuery::first(epoch(), 50));
/// assert!(response.is_success());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    pushes: AtomicU64,
    pulls: AtomicU64,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RecordStore::new()))
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            pushes: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
        }
    }

    /// Handles a push sent to `endpoint`.
    pub fn handle_push(
        &self,
        endpoint: &str,
        business_id: &str,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let kind = EntityKind::from_push_endpoint(endpoint)
            .ok_or_else(|| ServerError::UnknownEndpoint(endpoint.to_string()))?;
        self.handler.handle_push(kind, business_id, request)
    }

    /// Handles a pull sent to `endpoint`.
    pub fn handle_pull(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> ServerResult<PullResponse> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let kind = EntityKind::from_pull_endpoint(endpoint)
            .ok_or_else(|| ServerError::UnknownEndpoint(endpoint.to_string()))?;
        self.handler.handle_pull(kind, business_id, query)
    }

    /// Handles a push, reporting request-level errors in the envelope as
    /// the HTTP backend does.
    pub fn push_envelope(
        &self,
        endpoint: &str,
        business_id: &str,
        request: PushRequest,
    ) -> PushResponse {
        self.handle_push(endpoint, business_id, request)
            .unwrap_or_else(|e| ApiEnvelope::error(e.status(), e.to_string()))
    }

    /// Handles a pull, reporting request-level errors in the envelope.
    pub fn pull_envelope(
        &self,
        endpoint: &str,
        business_id: &str,
        query: &PullQuery,
    ) -> PullResponse {
        self.handle_pull(endpoint, business_id, query)
            .unwrap_or_else(|e| ApiEnvelope::error(e.status(), e.to_string()))
    }

    /// Stores a record as if another device had pushed it at `updated_at`.
    pub fn seed(
        &self,
        business_id: &str,
        kind: EntityKind,
        slug: impl Into<Slug>,
        payload: Payload,
        updated_at: Timestamp,
    ) {
        self.context.store.put(
            kind,
            StoredRecord {
                slug: slug.into(),
                business_id: business_id.to_string(),
                payload,
                updated_at,
            },
        );
    }

    /// Makes the next slug assigned for `kind` end in `next`.
    pub fn set_next_slug_number(&self, kind: EntityKind, next: u64) {
        self.context.store.set_next_number(kind, next);
    }

    /// Returns a stored record.
    pub fn record(&self, business_id: &str, kind: EntityKind, slug: &str) -> Option<StoredRecord> {
        self.context.store.get(business_id, kind, &Slug::new(slug))
    }

    /// Returns every stored record of a kind.
    pub fn records(&self, business_id: &str, kind: EntityKind) -> Vec<StoredRecord> {
        self.context.store.all(business_id, kind)
    }

    /// Returns the number of stored records of a kind.
    pub fn record_count(&self, business_id: &str, kind: EntityKind) -> usize {
        self.context.store.count(business_id, kind)
    }

    /// Number of push requests received.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Number of pull requests received.
    pub fn pull_count(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hisaab_sync_protocol::time::{epoch, from_millis};
    use hisaab_sync_protocol::{LocalId, WireRecord};
    use serde_json::json;

    fn new_product(local_id: i64) -> WireRecord {
        let mut payload = Payload::new();
        payload.insert("title".into(), json!("Chai"));
        WireRecord {
            slug: None,
            local_id: Some(LocalId(local_id)),
            business_slug: "B1".into(),
            updated_at: from_millis(1_000),
            payload,
        }
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::new(ServerConfig::default());
        server.set_next_slug_number(EntityKind::Product, 42);

        let response = server
            .handle_push("products", "B1", PushRequest { list: vec![new_product(5)] })
            .unwrap();
        let data = response.data.unwrap();
        assert_eq!(data.assigned[&LocalId(5)], Slug::new("PRD_42"));

        let pulled = server
            .handle_pull("sync-product", "B1", &PullQuery::first(epoch(), 10))
            .unwrap()
            .data
            .unwrap();
        assert_eq!(pulled.list.len(), 1);
        assert_eq!(pulled.list[0].slug, Some(Slug::new("PRD_42")));
        assert_eq!(pulled.list[0].updated_at, response.timestamp);
        assert_eq!(server.push_count(), 1);
        assert_eq!(server.pull_count(), 1);
    }

    #[test]
    fn businesses_are_isolated() {
        let server = SyncServer::new(ServerConfig::default());
        server.seed("B1", EntityKind::Party, "P1", Payload::new(), from_millis(10).unwrap());

        assert_eq!(server.record_count("B1", EntityKind::Party), 1);
        assert_eq!(server.record_count("B2", EntityKind::Party), 0);
        assert!(server.record("B2", EntityKind::Party, "P1").is_none());
    }

    #[test]
    fn unknown_endpoint_becomes_404_envelope() {
        let server = SyncServer::new(ServerConfig::default());
        let response = server.push_envelope("invoices", "B1", PushRequest::default());
        assert_eq!(response.status, Some(404));
        assert!(!response.is_success());
    }
}
