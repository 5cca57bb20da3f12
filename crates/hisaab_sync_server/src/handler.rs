//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{RecordStore, StoredRecord};
use hisaab_sync_protocol::{
    EntityKind, FieldRef, LocalId, PullData, PullQuery, PullResponse, PushData, PushRequest,
    PushResponse, RefTarget, ResultCount, Slug, Timestamp, WireRecord,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record storage, shared across handlers.
    pub store: Arc<RecordStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        Self { config, store }
    }
}

/// Handler for push and pull requests of one kind at a time.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a push.
    ///
    /// Every accepted record of the batch is stamped with the same server
    /// time, returned as the response timestamp. Records are applied in
    /// order, so a record may reference one earlier in the same batch.
    pub fn handle_push(
        &self,
        kind: EntityKind,
        business_id: &str,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        require_business(business_id)?;
        if kind.push_endpoint().is_none() {
            return Err(ServerError::InvalidRequest(format!("{kind} is read-only")));
        }
        let max = self.context.config.max_push_batch;
        if request.list.len() > max as usize {
            return Err(ServerError::BatchTooLarge {
                size: request.list.len(),
                max,
            });
        }

        let store = &self.context.store;
        let stamp = store.next_stamp();
        let mut data = PushData::default();

        for wire in request.list {
            let Some(local_id) = wire.local_id else {
                warn!(entity = %kind, "dropping pushed record without local id");
                continue;
            };
            match self.accept(kind, business_id, wire, stamp) {
                Ok((slug, assigned)) => {
                    if assigned {
                        data.assigned.insert(local_id, slug.clone());
                    }
                    data.accepted.push(slug);
                }
                Err(reason) => {
                    debug!(entity = %kind, local_id = local_id.0, %reason, "rejected record");
                    data.rejected.insert(local_id, reason);
                }
            }
        }

        debug!(
            entity = %kind,
            business = business_id,
            accepted = data.accepted.len(),
            rejected = data.rejected.len(),
            "push handled"
        );
        Ok(PushResponse::ok(data, stamp))
    }

    /// Handles a pull, returning records updated after the query time in
    /// server-time order.
    pub fn handle_pull(
        &self,
        kind: EntityKind,
        business_id: &str,
        query: &PullQuery,
    ) -> ServerResult<PullResponse> {
        require_business(business_id)?;
        let limit = query.limit.clamp(1, self.context.config.max_pull_page) as usize;
        let page = query.page.max(1) as usize;

        let matching = self
            .context
            .store
            .updated_since(business_id, kind, query.last_sync_time);
        let total = matching.len() as u64;
        let list: Vec<WireRecord> = matching
            .iter()
            .skip((page - 1) * limit)
            .take(limit)
            .map(StoredRecord::to_wire)
            .collect();

        Ok(PullResponse::ok(
            PullData {
                list,
                result_count: Some(ResultCount(total)),
            },
            chrono::Utc::now(),
        ))
    }

    /// Validates and stores one record. Returns its slug and whether the
    /// slug was assigned now, or the rejection reason.
    fn accept(
        &self,
        kind: EntityKind,
        business_id: &str,
        wire: WireRecord,
        stamp: Timestamp,
    ) -> Result<(Slug, bool), String> {
        let store = &self.context.store;

        if self.context.config.require_known_references {
            for field in kind.references() {
                self.check_reference(kind, business_id, &wire, field)?;
            }
        }

        let (slug, assigned) = match wire.slug {
            Some(slug) => {
                if let (Some(existing), Some(incoming)) =
                    (store.get(business_id, kind, &slug), wire.updated_at)
                {
                    if incoming < existing.updated_at {
                        return Err("stale: server has a newer version".into());
                    }
                }
                (slug, false)
            }
            None => (
                store.next_slug(kind, self.context.config.slug_prefix(kind)),
                true,
            ),
        };

        store.put(
            kind,
            StoredRecord {
                slug: slug.clone(),
                business_id: business_id.to_string(),
                payload: wire.payload,
                updated_at: stamp,
            },
        );
        Ok((slug, assigned))
    }

    fn check_reference(
        &self,
        kind: EntityKind,
        business_id: &str,
        wire: &WireRecord,
        field: &FieldRef,
    ) -> Result<(), String> {
        let Some(value) = wire
            .payload
            .get(field.field)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
        else {
            return Ok(());
        };
        if LocalId::is_placeholder(value) {
            return Err(format!("unresolved reference {}={value}", field.field));
        }
        let target = match field.target {
            RefTarget::Kind(target) => target,
            RefTarget::ByTypeField { type_field } => {
                match wire
                    .payload
                    .get(type_field)
                    .and_then(|v| v.as_str())
                    .and_then(|name| name.parse::<EntityKind>().ok())
                {
                    Some(target) => target,
                    None => return Err(format!("unknown {type_field} for {kind}")),
                }
            }
        };
        if self
            .context
            .store
            .contains(business_id, target, &Slug::new(value))
        {
            Ok(())
        } else {
            Err(format!("unknown {target} {value} in {}", field.field))
        }
    }
}

fn require_business(business_id: &str) -> ServerResult<()> {
    if business_id.trim().is_empty() {
        return Err(ServerError::MissingBusiness);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hisaab_sync_protocol::time::{epoch, from_millis};
    use hisaab_sync_protocol::Payload;
    use serde_json::json;

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let context = Arc::new(HandlerContext::new(config, Arc::new(RecordStore::new())));
        RequestHandler::new(context)
    }

    fn wire(local_id: i64, slug: Option<&str>, fields: &[(&str, &str)]) -> WireRecord {
        let payload: Payload = fields
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        WireRecord {
            slug: slug.map(Slug::new),
            local_id: Some(LocalId(local_id)),
            business_slug: "B1".into(),
            updated_at: from_millis(1_000),
            payload,
        }
    }

    fn push(handler: &RequestHandler, kind: EntityKind, list: Vec<WireRecord>) -> PushData {
        let response = handler
            .handle_push(kind, "B1", PushRequest { list })
            .unwrap();
        assert!(response.is_success());
        response.data.unwrap()
    }

    #[test]
    fn assigns_slugs_to_new_records() {
        let handler = create_handler(ServerConfig::default());
        let data = push(&handler, EntityKind::Category, vec![wire(7, None, &[("title", "Tea")])]);

        assert_eq!(data.assigned.get(&LocalId(7)), Some(&Slug::new("CAT_1")));
        assert_eq!(data.accepted, vec![Slug::new("CAT_1")]);
    }

    #[test]
    fn rejects_unknown_and_placeholder_references() {
        let handler = create_handler(ServerConfig::default());
        let data = push(
            &handler,
            EntityKind::Product,
            vec![
                wire(1, None, &[("category_slug", "local_9")]),
                wire(2, None, &[("category_slug", "CAT_404")]),
            ],
        );
        assert!(data.accepted.is_empty());
        assert!(data.rejected[&LocalId(1)].contains("unresolved"));
        assert!(data.rejected[&LocalId(2)].contains("CAT_404"));
    }

    #[test]
    fn references_within_a_batch_resolve_in_order() {
        let handler = create_handler(ServerConfig::default());
        let data = push(
            &handler,
            EntityKind::QuantityUnit,
            vec![
                wire(1, Some("QU_KG"), &[]),
                wire(2, Some("QU_G"), &[("parent_slug", "QU_KG")]),
            ],
        );
        assert_eq!(data.accepted.len(), 2);
    }

    #[test]
    fn stale_push_is_rejected() {
        let handler = create_handler(ServerConfig::default());
        push(&handler, EntityKind::Party, vec![wire(1, Some("P1"), &[])]);

        let mut old = wire(1, Some("P1"), &[]);
        old.updated_at = from_millis(10);
        let data = push(&handler, EntityKind::Party, vec![old]);
        assert!(data.rejected[&LocalId(1)].starts_with("stale"));
    }

    #[test]
    fn oversized_batch_fails_request() {
        let handler = create_handler(ServerConfig::default().with_max_push_batch(1));
        let err = handler
            .handle_push(
                EntityKind::Warehouse,
                "B1",
                PushRequest {
                    list: vec![wire(1, None, &[]), wire(2, None, &[])],
                },
            )
            .unwrap_err();
        assert_eq!(err, ServerError::BatchTooLarge { size: 2, max: 1 });
    }

    #[test]
    fn pull_pages_with_total() {
        let handler = create_handler(ServerConfig::default().with_max_pull_page(2));
        push(
            &handler,
            EntityKind::Warehouse,
            (1..=3).map(|i| wire(i, None, &[])).collect(),
        );

        let query = PullQuery::first(epoch(), 50);
        let first = handler.handle_pull(EntityKind::Warehouse, "B1", &query).unwrap();
        let first = first.data.unwrap();
        assert_eq!(first.list.len(), 2);
        assert_eq!(first.result_count, Some(ResultCount(3)));

        let second = handler
            .handle_pull(EntityKind::Warehouse, "B1", &query.next_page())
            .unwrap()
            .data
            .unwrap();
        assert_eq!(second.list.len(), 1);
    }

    #[test]
    fn missing_business_is_refused() {
        let handler = create_handler(ServerConfig::default());
        let err = handler
            .handle_pull(EntityKind::Party, " ", &PullQuery::first(epoch(), 10))
            .unwrap_err();
        assert_eq!(err, ServerError::MissingBusiness);
    }
}
