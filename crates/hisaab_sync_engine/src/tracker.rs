//! Dirty-flag tracking over the local store.

use crate::catalog;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{ConflictResolver, Winner};
use crate::store::{ClearOutcome, LocalStore, SyncedStamp, UpsertOutcome, WriteGuard};
use hisaab_sync_protocol::{EntityKind, LocalId, RemoteRecord, Slug, SyncRecord, Timestamp};
use std::sync::Arc;
use tracing::{debug, warn};

/// What applying one pulled record did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No local row had this slug; one was created.
    Inserted,
    /// A clean local row was replaced.
    Updated,
    /// The local row already matched the remote version.
    Unchanged,
    /// A dirty local row lost to the newer remote version.
    RemoteWon,
    /// A dirty local row was newer and kept.
    LocalKept,
    /// The local row changed while the record was being applied. It is
    /// left for the next run.
    Skipped,
}

impl ApplyOutcome {
    /// Returns true if the local store was written.
    pub fn wrote(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted | ApplyOutcome::Updated | ApplyOutcome::RemoteWon
        )
    }
}

/// Exposes pending local changes and applies remote ones.
///
/// The dirty flag on each local row is the only sync-specific state; the
/// tracker never caches rows between calls.
pub struct ChangeTracker<S: LocalStore> {
    store: Arc<S>,
    resolver: ConflictResolver,
}

impl<S: LocalStore> ChangeTracker<S> {
    /// Creates a tracker over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            resolver: ConflictResolver::new(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns every dirty record of `kind` for the business, read fresh.
    pub async fn pending_local_changes(
        &self,
        kind: EntityKind,
        business_id: &str,
    ) -> SyncResult<Vec<SyncRecord>> {
        self.store.list_dirty(kind, business_id).await
    }

    /// Clears the dirty flag of a pushed record and stamps it with its slug
    /// and the server's update time.
    ///
    /// If the row was edited after `record` was read, it keeps its dirty
    /// flag so the newer edit is pushed next time.
    pub async fn mark_synced(
        &self,
        record: &SyncRecord,
        slug: Slug,
        remote_updated_at: Option<Timestamp>,
    ) -> SyncResult<ClearOutcome> {
        let local_id = record
            .local_id
            .ok_or_else(|| SyncError::storage(record.entity, "pushed record has no local id"))?;
        let stamp = SyncedStamp {
            slug,
            remote_updated_at,
            snapshot_updated_at: record.local_updated_at,
        };
        let outcome = self.store.clear_dirty(record.entity, local_id, &stamp).await?;
        match outcome {
            ClearOutcome::StillDirty => {
                debug!(entity = %record.entity, local_id = local_id.0, "row edited during push, left dirty");
            }
            ClearOutcome::Missing => {
                warn!(entity = %record.entity, local_id = local_id.0, "pushed row disappeared before it was marked synced");
            }
            ClearOutcome::Cleared => {}
        }
        Ok(outcome)
    }

    /// Upserts a pulled record.
    ///
    /// A dirty local row with the same slug is only replaced if the
    /// conflict resolver picks the remote version.
    ///
    /// # Errors
    ///
    /// `ConflictResolution` if the two versions cannot be compared; store
    /// errors as returned by the store.
    pub async fn apply_remote_record(
        &self,
        business_id: &str,
        remote: RemoteRecord,
    ) -> SyncResult<ApplyOutcome> {
        let mut incoming = remote.record;
        let kind = incoming.entity;
        incoming.business_id = business_id.to_string();
        incoming.dirty = false;
        let slug = incoming
            .slug
            .clone()
            .ok_or_else(|| SyncError::Protocol(format!("pulled {kind} record has no slug")))?;

        let Some(local) = self.store.find_by_slug(kind, business_id, &slug).await? else {
            incoming.local_id = None;
            return Ok(match self.store.upsert(incoming, WriteGuard::IfClean).await? {
                UpsertOutcome::Written(_) => ApplyOutcome::Inserted,
                UpsertOutcome::GuardFailed => ApplyOutcome::Skipped,
            });
        };

        incoming.local_id = local.local_id;

        if !local.dirty {
            if local.remote_updated_at == incoming.remote_updated_at
                && local.payload == incoming.payload
            {
                return Ok(ApplyOutcome::Unchanged);
            }
            return Ok(match self.store.upsert(incoming, WriteGuard::IfClean).await? {
                UpsertOutcome::Written(_) => ApplyOutcome::Updated,
                UpsertOutcome::GuardFailed => ApplyOutcome::Skipped,
            });
        }

        match self.resolver.winner(&local, &incoming)? {
            Winner::Local => {
                debug!(entity = %kind, slug = %slug, "local edit is newer, keeping it");
                Ok(ApplyOutcome::LocalKept)
            }
            Winner::Remote => {
                let guard = WriteGuard::IfUnchangedSince(local.local_updated_at);
                Ok(match self.store.upsert(incoming, guard).await? {
                    UpsertOutcome::Written(_) => {
                        debug!(entity = %kind, slug = %slug, "remote version replaced local edit");
                        ApplyOutcome::RemoteWon
                    }
                    UpsertOutcome::GuardFailed => ApplyOutcome::Skipped,
                })
            }
        }
    }

    /// Replaces `local_<id>` placeholders pointing at a just-pushed record
    /// with its assigned slug, in every pending record that references it.
    ///
    /// Returns the number of rewritten fields.
    pub async fn rewrite_references(
        &self,
        business_id: &str,
        target: EntityKind,
        local_id: LocalId,
        slug: &Slug,
    ) -> SyncResult<usize> {
        let placeholder = local_id.placeholder();
        let mut rewritten = 0;
        let mut by_kind: Vec<(EntityKind, Vec<hisaab_sync_protocol::FieldRef>)> = Vec::new();
        for (kind, field) in catalog::referrers_of(target) {
            match by_kind.iter_mut().find(|(k, _)| *k == kind) {
                Some((_, fields)) => fields.push(field),
                None => by_kind.push((kind, vec![field])),
            }
        }

        for (kind, fields) in by_kind {
            let pending = self.store.list_dirty(kind, business_id).await?;
            for record in &pending {
                let Some(record_id) = record.local_id else {
                    continue;
                };
                for field in &fields {
                    if !field.points_at(record, target)
                        || record.str_field(field.field) != Some(placeholder.as_str())
                    {
                        continue;
                    }
                    if self
                        .store
                        .rewrite_reference(kind, record_id, field.field, &placeholder, slug)
                        .await?
                    {
                        rewritten += 1;
                    }
                }
            }
        }

        if rewritten > 0 {
            debug!(entity = %target, from = %placeholder, to = %slug, fields = rewritten, "rewrote references");
        }
        Ok(rewritten)
    }
}

/// Returns the reference fields of `record` that still hold a `local_<id>`
/// placeholder.
pub fn unresolved_references(record: &SyncRecord) -> Vec<&'static str> {
    record
        .entity
        .references()
        .iter()
        .filter(|f| {
            record
                .str_field(f.field)
                .is_some_and(LocalId::is_placeholder)
        })
        .map(|f| f.field)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLocalStore;
    use hisaab_sync_protocol::time::from_millis;
    use hisaab_sync_protocol::Payload;
    use serde_json::json;

    fn ts(ms: i64) -> Timestamp {
        from_millis(ms).unwrap()
    }

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    fn remote(kind: EntityKind, slug: &str, at: i64, fields: &[(&str, &str)]) -> RemoteRecord {
        RemoteRecord {
            record: SyncRecord {
                entity: kind,
                local_id: None,
                slug: Some(Slug::new(slug)),
                business_id: "B1".into(),
                payload: payload(fields),
                local_updated_at: Some(ts(at)),
                remote_updated_at: Some(ts(at)),
                dirty: false,
            },
            server_updated_at: ts(at),
        }
    }

    fn tracker() -> (Arc<MemoryLocalStore>, ChangeTracker<MemoryLocalStore>) {
        let store = Arc::new(MemoryLocalStore::new());
        (store.clone(), ChangeTracker::new(store))
    }

    #[tokio::test]
    async fn dirty_remote_newer_wins() {
        let (store, tracker) = tracker();
        let id = store.insert(
            SyncRecord::new_local(EntityKind::Party, LocalId(1), "B1", payload(&[("name", "Ali")]), ts(100))
                .with_slug("P1"),
        );

        let outcome = tracker
            .apply_remote_record("B1", remote(EntityKind::Party, "P1", 150, &[("name", "Ali Khan")]))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::RemoteWon);
        let row = store.get(EntityKind::Party, id).unwrap();
        assert!(!row.dirty);
        assert_eq!(row.str_field("name"), Some("Ali Khan"));
        assert_eq!(row.remote_updated_at, Some(ts(150)));
    }

    #[tokio::test]
    async fn dirty_local_newer_is_kept() {
        let (store, tracker) = tracker();
        let id = store.insert(
            SyncRecord::new_local(EntityKind::Party, LocalId(1), "B1", payload(&[("name", "Mine")]), ts(200))
                .with_slug("P1"),
        );

        let outcome = tracker
            .apply_remote_record("B1", remote(EntityKind::Party, "P1", 150, &[("name", "Theirs")]))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::LocalKept);
        let row = store.get(EntityKind::Party, id).unwrap();
        assert!(row.dirty);
        assert_eq!(row.str_field("name"), Some("Mine"));
    }

    #[tokio::test]
    async fn reapplying_same_version_is_a_no_op() {
        let (store, tracker) = tracker();
        let record = remote(EntityKind::Category, "CAT_1", 50, &[("title", "Drinks")]);

        assert_eq!(
            tracker.apply_remote_record("B1", record.clone()).await.unwrap(),
            ApplyOutcome::Inserted
        );
        let writes = store.write_count();
        assert_eq!(
            tracker.apply_remote_record("B1", record).await.unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn clean_row_takes_remote_update() {
        let (store, tracker) = tracker();
        tracker
            .apply_remote_record("B1", remote(EntityKind::Warehouse, "WH_1", 50, &[("title", "Main")]))
            .await
            .unwrap();
        let outcome = tracker
            .apply_remote_record("B1", remote(EntityKind::Warehouse, "WH_1", 80, &[("title", "Central")]))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        let rows = store.all(EntityKind::Warehouse);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].str_field("title"), Some("Central"));
    }

    #[tokio::test]
    async fn mark_synced_clears_and_stamps() {
        let (store, tracker) = tracker();
        let record =
            SyncRecord::new_local(EntityKind::Product, LocalId(42), "B1", Payload::new(), ts(10));
        store.insert(record.clone());

        let outcome = tracker
            .mark_synced(&record, Slug::new("PRD_42"), Some(ts(20)))
            .await
            .unwrap();
        assert_eq!(outcome, ClearOutcome::Cleared);
        let row = store.get(EntityKind::Product, LocalId(42)).unwrap();
        assert_eq!(row.slug, Some(Slug::new("PRD_42")));
        assert_eq!(row.remote_updated_at, Some(ts(20)));
        assert!(!row.dirty);
    }

    #[tokio::test]
    async fn rewrites_placeholders_in_later_kinds() {
        let (store, tracker) = tracker();
        store.insert(SyncRecord::new_local(
            EntityKind::TransactionDetail,
            LocalId(7),
            "B1",
            payload(&[("product_slug", "local_42"), ("quantity_unit_slug", "local_42")]),
            ts(10),
        ));
        store.insert(SyncRecord::new_local(
            EntityKind::EntityMedia,
            LocalId(8),
            "B1",
            payload(&[("entity_type", "product"), ("entity_slug", "local_42")]),
            ts(10),
        ));
        store.insert(SyncRecord::new_local(
            EntityKind::EntityMedia,
            LocalId(9),
            "B1",
            payload(&[("entity_type", "party"), ("entity_slug", "local_42")]),
            ts(10),
        ));

        let n = tracker
            .rewrite_references("B1", EntityKind::Product, LocalId(42), &Slug::new("PRD_42"))
            .await
            .unwrap();
        assert_eq!(n, 2);

        let detail = store.get(EntityKind::TransactionDetail, LocalId(7)).unwrap();
        assert_eq!(detail.str_field("product_slug"), Some("PRD_42"));
        // Same placeholder text, different target kind.
        assert_eq!(detail.str_field("quantity_unit_slug"), Some("local_42"));
        let media = store.get(EntityKind::EntityMedia, LocalId(8)).unwrap();
        assert_eq!(media.str_field("entity_slug"), Some("PRD_42"));
        let other = store.get(EntityKind::EntityMedia, LocalId(9)).unwrap();
        assert_eq!(other.str_field("entity_slug"), Some("local_42"));
    }

    #[test]
    fn finds_unresolved_references() {
        let record = SyncRecord::new_local(
            EntityKind::Product,
            LocalId(1),
            "B1",
            payload(&[("category_slug", "local_5"), ("base_unit_slug", "QU_1")]),
            ts(0),
        );
        assert_eq!(unresolved_references(&record), vec!["category_slug"]);
    }
}
