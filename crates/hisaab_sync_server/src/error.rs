//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that fail a whole request.
///
/// Per-record problems are not errors; they go in the push response's
/// `rejected` map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No kind is served on this path.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The request carried no business.
    #[error("missing business slug")]
    MissingBusiness,

    /// Push batch over the configured limit.
    #[error("batch of {size} exceeds limit of {max}")]
    BatchTooLarge {
        /// Records in the batch.
        size: usize,
        /// Configured limit.
        max: u32,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// Returns the status code reported in the response envelope.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::MissingBusiness => 401,
            ServerError::UnknownEndpoint(_) => 404,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::Internal(_) => 500,
        }
    }
}
