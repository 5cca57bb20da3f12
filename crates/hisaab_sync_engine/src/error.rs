//! Error types for the sync engine.

use hisaab_storage::StorageError;
use hisaab_sync_protocol::{EntityKind, ProtocolError, Slug};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// `Clone` so that one in-flight run's result can be handed to every caller
/// that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// No active business or user.
    #[error("no active session: {0}")]
    InvalidSession(String),

    /// Local persistence failed for one record or one entity type.
    #[error("storage error for {entity}: {message}")]
    Storage {
        /// Entity type being written.
        entity: EntityKind,
        /// Error message.
        message: String,
    },

    /// Network or server failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
        /// HTTP or envelope status, when one was received.
        status: Option<u16>,
    },

    /// Two versions of a record could not be compared.
    #[error("cannot resolve conflict for {entity} {slug}: {reason}")]
    ConflictResolution {
        /// Entity type.
        entity: EntityKind,
        /// Record slug.
        slug: Slug,
        /// Why comparison failed.
        reason: String,
    },

    /// Malformed payload from the server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// An attempt to change an already assigned slug.
    #[error("slug of {entity} is already {existing}, refusing {attempted}")]
    SlugConflict {
        /// Entity type.
        entity: EntityKind,
        /// Slug on record.
        existing: Slug,
        /// Slug that was offered.
        attempted: Slug,
    },

    /// The watermark store failed.
    #[error("sync state store error: {0}")]
    StateStore(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
            status: None,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
            status: None,
        }
    }

    /// Creates a transport error from a failed response status.
    ///
    /// 5xx is retryable, everything else is not.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: status >= 500,
            status: Some(status),
        }
    }

    /// Creates a storage error.
    pub fn storage(entity: EntityKind, message: impl Into<String>) -> Self {
        Self::Storage {
            entity,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport { retryable: true, .. })
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        Self::StateStore(e.to_string())
    }
}
