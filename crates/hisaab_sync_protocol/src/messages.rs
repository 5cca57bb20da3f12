//! Push and pull messages in the backend's JSON shape.
//!
//! Every response is wrapped in an [`ApiEnvelope`]:
//!
//! ```json
//! {"status": 200, "message": "ok", "timestamp": "2024-03-01T09:30:00.000Z", "data": {...}}
//! ```
//!
//! A push body is `{"list": [record...]}`; a pull is a `GET` with
//! `last-sync-time`, `page` and `limit` query parameters.

use crate::entity::EntityKind;
use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{LocalId, Payload, Slug, SyncRecord};
use crate::time::{self, Timestamp};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// The `status` value of a successful response.
pub const STATUS_OK: u16 = 200;

/// A record as it travels over the wire.
///
/// Payload fields are flattened next to the sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    /// Cross-device identifier, `null` for records never pushed before.
    #[serde(default)]
    pub slug: Option<Slug>,
    /// Sender's local row id, used to key slug assignments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    /// Owning business.
    pub business_slug: String,
    /// Last update time. On pull this is the server's authoritative time.
    #[serde(default, with = "time::iso8601::option")]
    pub updated_at: Option<Timestamp>,
    /// Entity-specific fields.
    #[serde(flatten)]
    pub payload: Payload,
}

const RESERVED_FIELDS: [&str; 4] = ["slug", "local_id", "business_slug", "updated_at"];

impl WireRecord {
    /// Builds the outgoing form of a local record.
    pub fn from_record(record: &SyncRecord) -> Self {
        let mut payload = record.payload.clone();
        for field in RESERVED_FIELDS {
            payload.remove(field);
        }
        Self {
            slug: record.slug.clone(),
            local_id: record.local_id,
            business_slug: record.business_id.clone(),
            updated_at: record.local_updated_at,
            payload,
        }
    }

    /// Interprets a pulled record.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` if the record lacks a slug or an update time.
    /// A pulled record without either cannot be joined or ordered.
    pub fn into_remote(self, entity: EntityKind) -> ProtocolResult<RemoteRecord> {
        let slug = self.slug.ok_or(ProtocolError::MissingField("slug"))?;
        let server_updated_at = self
            .updated_at
            .ok_or(ProtocolError::MissingField("updated_at"))?;
        Ok(RemoteRecord {
            record: SyncRecord {
                entity,
                local_id: None,
                slug: Some(slug),
                business_id: self.business_slug,
                payload: self.payload,
                local_updated_at: Some(server_updated_at),
                remote_updated_at: Some(server_updated_at),
                dirty: false,
            },
            server_updated_at,
        })
    }
}

/// A pulled record with the server's update time.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// The record, clean and carrying its slug.
    pub record: SyncRecord,
    /// Server's authoritative update time.
    pub server_updated_at: Timestamp,
}

/// Response wrapper shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Endpoint-specific body.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// HTTP-like status code; `200` means success.
    #[serde(default)]
    pub status: Option<u16>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Server time when the response was produced.
    #[serde(default, with = "time::iso8601::option")]
    pub timestamp: Option<Timestamp>,
}

impl<T> ApiEnvelope<T> {
    /// Creates a successful response.
    pub fn ok(data: T, timestamp: Timestamp) -> Self {
        Self {
            data: Some(data),
            status: Some(STATUS_OK),
            message: Some("success".into()),
            timestamp: Some(timestamp),
        }
    }

    /// Creates a failed response.
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            data: None,
            status: Some(status),
            message: Some(message.into()),
            timestamp: None,
        }
    }

    /// Returns true if `status` is 200.
    pub fn is_success(&self) -> bool {
        self.status == Some(STATUS_OK)
    }
}

/// Response to a push.
pub type PushResponse = ApiEnvelope<PushData>;

/// Response to a pull.
pub type PullResponse = ApiEnvelope<PullData>;

/// Body of a push request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Records to push.
    pub list: Vec<WireRecord>,
}

impl PushRequest {
    /// Creates a push request from local records.
    pub fn from_records(records: &[SyncRecord]) -> Self {
        Self {
            list: records.iter().map(WireRecord::from_record).collect(),
        }
    }
}

/// Body of a push response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    /// Slugs of every accepted record, newly assigned ones included.
    #[serde(default)]
    pub accepted: Vec<Slug>,
    /// Slugs assigned to records pushed without one, keyed by local id.
    #[serde(default)]
    pub assigned: BTreeMap<LocalId, Slug>,
    /// Per-record rejection reasons, keyed by local id.
    #[serde(default)]
    pub rejected: BTreeMap<LocalId, String>,
}

/// Outcome of pushing one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    /// Slugs of every accepted record.
    pub accepted_slugs: Vec<Slug>,
    /// Newly assigned slugs, keyed by local id.
    pub assigned_slugs: BTreeMap<LocalId, Slug>,
    /// Rejection reasons, keyed by local id.
    pub rejected: BTreeMap<LocalId, String>,
    /// Server time stamped on the accepted records.
    pub server_time: Option<Timestamp>,
}

impl PushResult {
    /// Builds a result from a response body and its timestamp.
    pub fn from_data(data: PushData, server_time: Option<Timestamp>) -> Self {
        Self {
            accepted_slugs: data.accepted,
            assigned_slugs: data.assigned,
            rejected: data.rejected,
            server_time,
        }
    }

    /// Merges another batch's result into this one.
    pub fn merge(&mut self, other: PushResult) {
        self.accepted_slugs.extend(other.accepted_slugs);
        self.assigned_slugs.extend(other.assigned_slugs);
        self.rejected.extend(other.rejected);
        self.server_time = match (self.server_time, other.server_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Query parameters of a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullQuery {
    /// Only records updated after this time are returned.
    #[serde(rename = "last-sync-time", with = "time::iso8601")]
    pub last_sync_time: Timestamp,
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
}

impl PullQuery {
    /// Creates the query for the first page.
    pub fn first(last_sync_time: Timestamp, limit: u32) -> Self {
        Self {
            last_sync_time,
            page: 1,
            limit,
        }
    }

    /// Returns the query for the next page.
    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

/// Body of a pull response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullData {
    /// Records on this page.
    #[serde(default)]
    pub list: Vec<WireRecord>,
    /// Total number of matching records across all pages.
    #[serde(rename = "resultCount", default)]
    pub result_count: Option<ResultCount>,
}

/// A record count that the backend sends as a string.
///
/// Deserializes from either a JSON string or number; serializes as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCount(pub u64);

impl Serialize for ResultCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ResultCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ResultCount(n)),
            Raw::Text(s) => s
                .trim()
                .parse::<u64>()
                .map(ResultCount)
                .map_err(|_| serde::de::Error::custom(ProtocolError::InvalidResultCount(s))),
        }
    }
}
