//! Local store seam.
//!
//! The engine never issues raw queries. Everything it needs from the local
//! database goes through [`LocalStore`], keyed by entity kind.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use hisaab_sync_protocol::{EntityKind, LocalId, Slug, SyncRecord, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Precondition for [`LocalStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Write unconditionally.
    Always,
    /// Write only if the existing row is absent or clean.
    IfClean,
    /// Write only if the existing row's local edit time is still the given one.
    IfUnchangedSince(Option<Timestamp>),
}

/// Result of [`LocalStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was written.
    Written(LocalId),
    /// The guard did not hold; nothing was written.
    GuardFailed,
}

/// What `markSynced` writes onto a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedStamp {
    /// The row's slug, newly assigned or already known.
    pub slug: Slug,
    /// Server's authoritative update time.
    pub remote_updated_at: Option<Timestamp>,
    /// `local_updated_at` of the snapshot that was pushed.
    pub snapshot_updated_at: Option<Timestamp>,
}

/// Result of [`LocalStore::clear_dirty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Stamped and marked clean.
    Cleared,
    /// Stamped, but edited since the snapshot so left dirty.
    StillDirty,
    /// The row no longer exists.
    Missing,
}

/// Typed access to the local database.
///
/// Implementations map each [`EntityKind`] onto its table. Errors are
/// reported as [`SyncError::Storage`] or [`SyncError::SlugConflict`].
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Returns every dirty record of `kind` owned by `business_id`.
    async fn list_dirty(&self, kind: EntityKind, business_id: &str) -> SyncResult<Vec<SyncRecord>>;

    /// Looks a record up by slug.
    async fn find_by_slug(
        &self,
        kind: EntityKind,
        business_id: &str,
        slug: &Slug,
    ) -> SyncResult<Option<SyncRecord>>;

    /// Inserts or replaces a record.
    ///
    /// The row is matched by `local_id` when present, otherwise by slug. An
    /// unmatched record is inserted under a fresh local id. The row takes the
    /// record's `dirty` flag as given.
    async fn upsert(&self, record: SyncRecord, guard: WriteGuard) -> SyncResult<UpsertOutcome>;

    /// Stamps a pushed row with its slug and server time, and clears its
    /// dirty flag unless it was edited after the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SlugConflict` if the row already carries a different slug.
    async fn clear_dirty(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        stamp: &SyncedStamp,
    ) -> SyncResult<ClearOutcome>;

    /// Replaces `field` on a row if it still equals `from`.
    ///
    /// Returns true if the field was rewritten. The row's dirty flag and
    /// edit time are left alone.
    async fn rewrite_reference(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        field: &str,
        from: &str,
        to: &Slug,
    ) -> SyncResult<bool>;
}

/// An in-memory local store for tests and demos.
///
/// Rows are keyed by `(kind, local_id)`. Writes to a kind can be made to fail
/// with [`fail_writes_for`](Self::fail_writes_for).
#[derive(Debug)]
pub struct MemoryLocalStore {
    rows: RwLock<BTreeMap<(EntityKind, LocalId), SyncRecord>>,
    next_id: AtomicI64,
    writes: AtomicU64,
    failing: RwLock<HashSet<EntityKind>>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            writes: AtomicU64::new(0),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Inserts a row directly, as a UI edit would.
    ///
    /// A record without a local id gets a fresh one.
    pub fn insert(&self, mut record: SyncRecord) -> LocalId {
        let id = match record.local_id {
            Some(id) => {
                self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                id
            }
            None => LocalId(self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        record.local_id = Some(id);
        self.rows.write().insert((record.entity, id), record);
        id
    }

    /// Applies a local edit: merges `changes` into the payload, bumps the
    /// edit time and marks the row dirty.
    pub fn edit(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        changes: hisaab_sync_protocol::Payload,
        updated_at: Timestamp,
    ) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(&(kind, local_id)) {
            Some(row) => {
                row.payload.extend(changes);
                row.local_updated_at = Some(updated_at);
                row.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Returns a row by local id.
    pub fn get(&self, kind: EntityKind, local_id: LocalId) -> Option<SyncRecord> {
        self.rows.read().get(&(kind, local_id)).cloned()
    }

    /// Returns every row of `kind`.
    pub fn all(&self, kind: EntityKind) -> Vec<SyncRecord> {
        self.rows
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Returns the total number of rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Number of sync-driven writes performed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes every sync-driven write to `kind` fail (or stop failing).
    pub fn fail_writes_for(&self, kind: EntityKind, fail: bool) {
        let mut failing = self.failing.write();
        if fail {
            failing.insert(kind);
        } else {
            failing.remove(&kind);
        }
    }

    fn check_writable(&self, kind: EntityKind) -> SyncResult<()> {
        if self.failing.read().contains(&kind) {
            return Err(SyncError::storage(kind, "injected write failure"));
        }
        Ok(())
    }

    fn note_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn list_dirty(&self, kind: EntityKind, business_id: &str) -> SyncResult<Vec<SyncRecord>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|((k, _), r)| *k == kind && r.dirty && r.business_id == business_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn find_by_slug(
        &self,
        kind: EntityKind,
        business_id: &str,
        slug: &Slug,
    ) -> SyncResult<Option<SyncRecord>> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|((k, _), r)| {
                *k == kind && r.business_id == business_id && r.slug.as_ref() == Some(slug)
            })
            .map(|(_, r)| r.clone()))
    }

    async fn upsert(&self, mut record: SyncRecord, guard: WriteGuard) -> SyncResult<UpsertOutcome> {
        let kind = record.entity;
        self.check_writable(kind)?;

        let mut rows = self.rows.write();
        let existing_id = match record.local_id {
            Some(id) if rows.contains_key(&(kind, id)) => Some(id),
            Some(_) => None,
            None => record.slug.as_ref().and_then(|slug| {
                rows.iter()
                    .find(|((k, _), r)| {
                        *k == kind
                            && r.business_id == record.business_id
                            && r.slug.as_ref() == Some(slug)
                    })
                    .map(|((_, id), _)| *id)
            }),
        };

        if let Some(id) = existing_id {
            let Some(current) = rows.get(&(kind, id)) else {
                return Err(SyncError::storage(kind, "row vanished during upsert"));
            };
            let allowed = match guard {
                WriteGuard::Always => true,
                WriteGuard::IfClean => !current.dirty,
                WriteGuard::IfUnchangedSince(at) => current.local_updated_at == at,
            };
            if !allowed {
                return Ok(UpsertOutcome::GuardFailed);
            }
            if let (Some(existing), Some(offered)) = (&current.slug, &record.slug) {
                if existing != offered {
                    return Err(SyncError::SlugConflict {
                        entity: kind,
                        existing: existing.clone(),
                        attempted: offered.clone(),
                    });
                }
            }
            if record.slug.is_none() {
                record.slug = current.slug.clone();
            }
            record.local_id = Some(id);
            rows.insert((kind, id), record);
            self.note_write();
            return Ok(UpsertOutcome::Written(id));
        }

        let id = match record.local_id {
            Some(id) => {
                self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
                id
            }
            None => LocalId(self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        record.local_id = Some(id);
        rows.insert((kind, id), record);
        self.note_write();
        Ok(UpsertOutcome::Written(id))
    }

    async fn clear_dirty(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        stamp: &SyncedStamp,
    ) -> SyncResult<ClearOutcome> {
        self.check_writable(kind)?;

        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(&(kind, local_id)) else {
            return Ok(ClearOutcome::Missing);
        };
        if let Some(existing) = &row.slug {
            if *existing != stamp.slug {
                return Err(SyncError::SlugConflict {
                    entity: kind,
                    existing: existing.clone(),
                    attempted: stamp.slug.clone(),
                });
            }
        }
        row.slug = Some(stamp.slug.clone());
        if stamp.remote_updated_at.is_some() {
            row.remote_updated_at = stamp.remote_updated_at;
        }
        let outcome = if row.local_updated_at == stamp.snapshot_updated_at {
            row.dirty = false;
            ClearOutcome::Cleared
        } else {
            ClearOutcome::StillDirty
        };
        self.note_write();
        Ok(outcome)
    }

    async fn rewrite_reference(
        &self,
        kind: EntityKind,
        local_id: LocalId,
        field: &str,
        from: &str,
        to: &Slug,
    ) -> SyncResult<bool> {
        self.check_writable(kind)?;

        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(&(kind, local_id)) else {
            return Ok(false);
        };
        match row.payload.get(field).and_then(|v| v.as_str()) {
            Some(current) if current == from => {
                row.payload.insert(
                    field.to_string(),
                    serde_json::Value::String(to.as_str().to_string()),
                );
                self.note_write();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hisaab_sync_protocol::time::from_millis;
    use hisaab_sync_protocol::Payload;
    use serde_json::json;

    fn ts(ms: i64) -> Timestamp {
        from_millis(ms).unwrap()
    }

    fn local(kind: EntityKind, id: i64, at: i64) -> SyncRecord {
        SyncRecord::new_local(kind, LocalId(id), "B1", Payload::new(), ts(at))
    }

    #[tokio::test]
    async fn list_dirty_filters_kind_and_business() {
        let store = MemoryLocalStore::new();
        store.insert(local(EntityKind::Product, 1, 10));
        store.insert(local(EntityKind::Category, 2, 10));
        let mut other = local(EntityKind::Product, 3, 10);
        other.business_id = "B2".into();
        store.insert(other);

        let dirty = store.list_dirty(EntityKind::Product, "B1").await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].local_id, Some(LocalId(1)));
    }

    #[tokio::test]
    async fn clear_dirty_assigns_slug_once() {
        let store = MemoryLocalStore::new();
        store.insert(local(EntityKind::Product, 42, 10));

        let stamp = SyncedStamp {
            slug: Slug::new("PRD_42"),
            remote_updated_at: Some(ts(20)),
            snapshot_updated_at: Some(ts(10)),
        };
        let outcome = store
            .clear_dirty(EntityKind::Product, LocalId(42), &stamp)
            .await
            .unwrap();
        assert_eq!(outcome, ClearOutcome::Cleared);
        let row = store.get(EntityKind::Product, LocalId(42)).unwrap();
        assert_eq!(row.slug, Some(Slug::new("PRD_42")));
        assert!(!row.dirty);

        let other = SyncedStamp {
            slug: Slug::new("PRD_99"),
            ..stamp
        };
        let err = store
            .clear_dirty(EntityKind::Product, LocalId(42), &other)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SlugConflict { .. }));
    }

    #[tokio::test]
    async fn clear_dirty_keeps_concurrent_edit_dirty() {
        let store = MemoryLocalStore::new();
        store.insert(local(EntityKind::Party, 1, 10));
        let mut changes = Payload::new();
        changes.insert("name".into(), json!("Edited"));
        store.edit(EntityKind::Party, LocalId(1), changes, ts(30));

        let stamp = SyncedStamp {
            slug: Slug::new("PTY_1"),
            remote_updated_at: Some(ts(20)),
            snapshot_updated_at: Some(ts(10)),
        };
        let outcome = store
            .clear_dirty(EntityKind::Party, LocalId(1), &stamp)
            .await
            .unwrap();
        assert_eq!(outcome, ClearOutcome::StillDirty);
        let row = store.get(EntityKind::Party, LocalId(1)).unwrap();
        assert!(row.dirty);
        assert_eq!(row.slug, Some(Slug::new("PTY_1")));
    }

    #[tokio::test]
    async fn upsert_matches_by_slug_and_respects_guard() {
        let store = MemoryLocalStore::new();
        let id = store.insert(local(EntityKind::Category, 5, 10).with_slug("CAT_1"));

        let mut remote = local(EntityKind::Category, 0, 50).with_slug("CAT_1");
        remote.local_id = None;
        remote.dirty = false;

        let outcome = store
            .upsert(remote.clone(), WriteGuard::IfClean)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::GuardFailed);

        let outcome = store.upsert(remote, WriteGuard::Always).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Written(id));
        assert!(!store.get(EntityKind::Category, id).unwrap().dirty);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn upsert_inserts_unknown_slug() {
        let store = MemoryLocalStore::new();
        let mut remote = local(EntityKind::Warehouse, 0, 50).with_slug("WH_1");
        remote.local_id = None;
        remote.dirty = false;
        let outcome = store.upsert(remote, WriteGuard::IfClean).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Written(_)));
        assert_eq!(store.all(EntityKind::Warehouse).len(), 1);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn rewrite_reference_is_compare_and_set() {
        let store = MemoryLocalStore::new();
        let mut detail = local(EntityKind::TransactionDetail, 7, 10);
        detail
            .payload
            .insert("product_slug".into(), json!("local_42"));
        store.insert(detail);

        let to = Slug::new("PRD_42");
        assert!(store
            .rewrite_reference(EntityKind::TransactionDetail, LocalId(7), "product_slug", "local_42", &to)
            .await
            .unwrap());
        assert!(!store
            .rewrite_reference(EntityKind::TransactionDetail, LocalId(7), "product_slug", "local_42", &to)
            .await
            .unwrap());
        let row = store.get(EntityKind::TransactionDetail, LocalId(7)).unwrap();
        assert_eq!(row.str_field("product_slug"), Some("PRD_42"));
        assert!(row.dirty);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_storage_errors() {
        let store = MemoryLocalStore::new();
        store.fail_writes_for(EntityKind::Product, true);
        let err = store
            .upsert(local(EntityKind::Product, 1, 10), WriteGuard::Always)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage { entity: EntityKind::Product, .. }));
    }
}
