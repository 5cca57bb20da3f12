//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting wire data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A timestamp string is not valid ISO-8601.
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// An entity type name is not known.
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    /// A required field is absent from a wire record.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// A count field is not a non-negative integer.
    #[error("invalid result count: {0}")]
    InvalidResultCount(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
