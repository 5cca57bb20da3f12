//! ISO-8601 timestamp helpers.
//!
//! Timestamps travel as ISO-8601 UTC strings with millisecond precision
//! (`2024-03-01T09:30:00.000Z`). Locally they are persisted as epoch
//! milliseconds.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// A point in time, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Returns the Unix epoch.
pub fn epoch() -> Timestamp {
    // The default `DateTime<Utc>` is 1970-01-01T00:00:00Z.
    Timestamp::default()
}

/// Formats `ts` as ISO-8601 with milliseconds and a `Z` suffix.
pub fn format_iso8601(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 with any offset, and the offset-less
/// `YYYY-MM-DD HH:MM:SS` form some backend responses use (read as UTC).
///
/// # Errors
///
/// Returns `InvalidTimestamp` if neither form matches.
pub fn parse_iso8601(value: &str) -> ProtocolResult<Timestamp> {
    let trimmed = value.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|_| ProtocolError::InvalidTimestamp {
                value: value.to_string(),
                reason: rfc_err.to_string(),
            }),
    }
}

/// Converts epoch milliseconds to a timestamp.
///
/// Returns `None` when `millis` is out of range.
pub fn from_millis(millis: i64) -> Option<Timestamp> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Converts a timestamp to epoch milliseconds.
pub fn to_millis(ts: &Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Serde adapter for `Timestamp` fields using [`format_iso8601`].
pub mod iso8601 {
    use super::{format_iso8601, parse_iso8601, Timestamp};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a timestamp.
    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_iso8601(ts))
    }

    /// Deserializes a timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_iso8601(&raw).map_err(serde::de::Error::custom)
    }

    /// Serde adapter for `Option<Timestamp>`.
    pub mod option {
        use super::{format_iso8601, parse_iso8601, Timestamp};
        use serde::{Deserialize, Deserializer, Serializer};

        /// Serializes an optional timestamp.
        pub fn serialize<S: Serializer>(
            ts: &Option<Timestamp>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&format_iso8601(ts)),
                None => serializer.serialize_none(),
            }
        }

        /// Deserializes an optional timestamp. Empty strings read as `None`.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Timestamp>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(s) => parse_iso8601(s).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}
