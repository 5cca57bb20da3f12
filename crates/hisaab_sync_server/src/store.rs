//! Server-side record storage.

use chrono::{Duration, Utc};
use hisaab_sync_protocol::{EntityKind, Payload, Slug, Timestamp, WireRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

/// A record as the server holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// The record's slug.
    pub slug: Slug,
    /// Owning business.
    pub business_id: String,
    /// Fields other than the envelope ones.
    pub payload: Payload,
    /// Server time of the last accepted write.
    pub updated_at: Timestamp,
}

impl StoredRecord {
    /// Returns the pull form of the record.
    pub fn to_wire(&self) -> WireRecord {
        WireRecord {
            slug: Some(self.slug.clone()),
            local_id: None,
            business_slug: self.business_id.clone(),
            updated_at: Some(self.updated_at),
            payload: self.payload.clone(),
        }
    }
}

type Table = BTreeMap<Slug, StoredRecord>;

/// Records per (business, kind, slug), with per-kind slug counters and a
/// monotonic write clock.
pub struct RecordStore {
    tables: RwLock<HashMap<(String, EntityKind), Table>>,
    counters: Mutex<HashMap<EntityKind, u64>>,
    last_stamp: Mutex<Timestamp>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            last_stamp: Mutex::new(Timestamp::default()),
        }
    }

    /// Returns a write time strictly later than every earlier one.
    pub fn next_stamp(&self) -> Timestamp {
        let mut last = self.last_stamp.lock();
        let now = Utc::now();
        let stamp = if now > *last {
            now
        } else {
            *last + Duration::milliseconds(1)
        };
        *last = stamp;
        stamp
    }

    /// Assigns the next slug for a kind, `<prefix>_<n>`.
    pub fn next_slug(&self, kind: EntityKind, prefix: &str) -> Slug {
        let mut counters = self.counters.lock();
        let counter = counters.entry(kind).or_insert(0);
        *counter += 1;
        Slug::new(format!("{prefix}_{counter}"))
    }

    /// Makes the next assigned slug for `kind` use `next`.
    pub fn set_next_number(&self, kind: EntityKind, next: u64) {
        self.counters.lock().insert(kind, next.saturating_sub(1));
    }

    /// Looks a record up.
    pub fn get(&self, business_id: &str, kind: EntityKind, slug: &Slug) -> Option<StoredRecord> {
        self.tables
            .read()
            .get(&(business_id.to_string(), kind))
            .and_then(|t| t.get(slug))
            .cloned()
    }

    /// Returns true if the record exists.
    pub fn contains(&self, business_id: &str, kind: EntityKind, slug: &Slug) -> bool {
        self.tables
            .read()
            .get(&(business_id.to_string(), kind))
            .is_some_and(|t| t.contains_key(slug))
    }

    /// Inserts or replaces a record.
    ///
    /// The write clock is moved past `updated_at` so later stamps stay
    /// ahead of it.
    pub fn put(&self, kind: EntityKind, record: StoredRecord) {
        {
            let mut last = self.last_stamp.lock();
            if record.updated_at > *last {
                *last = record.updated_at;
            }
        }
        self.tables
            .write()
            .entry((record.business_id.clone(), kind))
            .or_default()
            .insert(record.slug.clone(), record);
    }

    /// Returns records updated strictly after `since`, oldest first.
    pub fn updated_since(
        &self,
        business_id: &str,
        kind: EntityKind,
        since: Timestamp,
    ) -> Vec<StoredRecord> {
        let tables = self.tables.read();
        let mut records: Vec<StoredRecord> = tables
            .get(&(business_id.to_string(), kind))
            .map(|t| t.values().filter(|r| r.updated_at > since).cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.slug.cmp(&b.slug)));
        records
    }

    /// Returns every record of a kind, by slug.
    pub fn all(&self, business_id: &str, kind: EntityKind) -> Vec<StoredRecord> {
        self.tables
            .read()
            .get(&(business_id.to_string(), kind))
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of records of a kind.
    pub fn count(&self, business_id: &str, kind: EntityKind) -> usize {
        self.tables
            .read()
            .get(&(business_id.to_string(), kind))
            .map_or(0, BTreeMap::len)
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hisaab_sync_protocol::time::from_millis;

    fn record(slug: &str, ms: i64) -> StoredRecord {
        StoredRecord {
            slug: Slug::new(slug),
            business_id: "B1".into(),
            payload: Payload::new(),
            updated_at: from_millis(ms).unwrap(),
        }
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let store = RecordStore::new();
        let a = store.next_stamp();
        let b = store.next_stamp();
        let c = store.next_stamp();
        assert!(a < b && b < c);
    }

    #[test]
    fn slugs_count_per_kind() {
        let store = RecordStore::new();
        assert_eq!(store.next_slug(EntityKind::Product, "PRD"), Slug::new("PRD_1"));
        assert_eq!(store.next_slug(EntityKind::Product, "PRD"), Slug::new("PRD_2"));
        assert_eq!(store.next_slug(EntityKind::Category, "CAT"), Slug::new("CAT_1"));

        store.set_next_number(EntityKind::Product, 42);
        assert_eq!(store.next_slug(EntityKind::Product, "PRD"), Slug::new("PRD_42"));
    }

    #[test]
    fn updated_since_is_ordered_and_exclusive() {
        let store = RecordStore::new();
        store.put(EntityKind::Party, record("P2", 300));
        store.put(EntityKind::Party, record("P1", 100));
        store.put(EntityKind::Party, record("P3", 200));

        let slugs: Vec<_> = store
            .updated_since("B1", EntityKind::Party, from_millis(100).unwrap())
            .into_iter()
            .map(|r| r.slug)
            .collect();
        assert_eq!(slugs, vec![Slug::new("P3"), Slug::new("P2")]);
        assert!(store.updated_since("B2", EntityKind::Party, Timestamp::default()).is_empty());
    }

    #[test]
    fn seeded_time_pushes_clock_forward() {
        let store = RecordStore::new();
        let future = Utc::now() + Duration::hours(1);
        store.put(
            EntityKind::Party,
            StoredRecord {
                updated_at: future,
                ..record("P1", 0)
            },
        );
        assert!(store.next_stamp() > future);
    }
}
