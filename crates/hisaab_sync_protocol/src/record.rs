//! Sync record envelope and identifiers.

use crate::entity::EntityKind;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity-specific fields of a record, kept as JSON.
pub type Payload = serde_json::Map<String, serde_json::Value>;

const PLACEHOLDER_PREFIX: &str = "local_";

/// A stable cross-device identifier for an entity instance.
///
/// Assigned exactly once and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    /// Wraps a slug string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the slug as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Slug {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Slug {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The local store's row id for a record.
///
/// Before a record has a slug, other records reference it through its
/// placeholder form `local_<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub i64);

impl LocalId {
    /// Returns the placeholder string used in reference fields.
    pub fn placeholder(&self) -> String {
        format!("{PLACEHOLDER_PREFIX}{}", self.0)
    }

    /// Parses a `local_<id>` placeholder.
    pub fn from_placeholder(value: &str) -> Option<Self> {
        value
            .strip_prefix(PLACEHOLDER_PREFIX)
            .and_then(|rest| rest.parse::<i64>().ok())
            .map(LocalId)
    }

    /// Returns true if `value` is a `local_<id>` placeholder.
    pub fn is_placeholder(value: &str) -> bool {
        Self::from_placeholder(value).is_some()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.placeholder())
    }
}

/// One entity instance as seen by the sync engine.
///
/// Records are materialized on demand from the local store's dirty set or
/// from a remote page; the store's own rows stay the source of truth.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Entity type.
    pub entity: EntityKind,
    /// Local row id. `None` for records that only exist remotely so far.
    pub local_id: Option<LocalId>,
    /// Cross-device identifier, `None` until first assigned.
    pub slug: Option<Slug>,
    /// Owning business.
    pub business_id: String,
    /// Entity-specific fields.
    pub payload: Payload,
    /// Last local modification time.
    pub local_updated_at: Option<Timestamp>,
    /// Server's authoritative update time, as of the last sync.
    pub remote_updated_at: Option<Timestamp>,
    /// True if the record has unsynced local changes.
    pub dirty: bool,
}

impl SyncRecord {
    /// Creates a dirty, slug-less record as produced by a local edit.
    pub fn new_local(
        entity: EntityKind,
        local_id: LocalId,
        business_id: impl Into<String>,
        payload: Payload,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            entity,
            local_id: Some(local_id),
            slug: None,
            business_id: business_id.into(),
            payload,
            local_updated_at: Some(updated_at),
            remote_updated_at: None,
            dirty: true,
        }
    }

    /// Sets the slug.
    pub fn with_slug(mut self, slug: impl Into<Slug>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Returns a string payload field.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    /// Returns the timestamp the conflict resolver compares for this side.
    ///
    /// A dirty record is compared by its local edit time, a clean one by the
    /// server time it was last synced at.
    pub fn effective_updated_at(&self) -> Option<Timestamp> {
        if self.dirty {
            self.local_updated_at
        } else {
            self.remote_updated_at.or(self.local_updated_at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::from_millis;

    #[test]
    fn placeholder_format() {
        assert_eq!(LocalId(42).placeholder(), "local_42");
        assert_eq!(LocalId::from_placeholder("local_42"), Some(LocalId(42)));
        assert_eq!(LocalId::from_placeholder("PRD_42"), None);
        assert_eq!(LocalId::from_placeholder("local_"), None);
        assert!(!LocalId::is_placeholder("local_x1"));
    }

    #[test]
    fn new_local_is_dirty_without_slug() {
        let ts = from_millis(100).unwrap();
        let record = SyncRecord::new_local(
            EntityKind::Product,
            LocalId(1),
            "B1",
            Payload::new(),
            ts,
        );
        assert!(record.dirty);
        assert!(record.slug.is_none());
        assert_eq!(record.effective_updated_at(), Some(ts));
    }

    #[test]
    fn clean_record_compares_by_remote_time() {
        let mut record = SyncRecord::new_local(
            EntityKind::Party,
            LocalId(1),
            "B1",
            Payload::new(),
            from_millis(100).unwrap(),
        );
        record.dirty = false;
        record.remote_updated_at = from_millis(150);
        assert_eq!(record.effective_updated_at(), from_millis(150));
    }

    #[test]
    fn slug_serializes_as_plain_string() {
        let json = serde_json::to_string(&Slug::new("PRD_42")).unwrap();
        assert_eq!(json, "\"PRD_42\"");
    }
}
