//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log file is corrupted.
    #[error("storage corrupted at line {line}: {reason}")]
    Corrupted {
        /// 1-based line number of the bad entry.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Another process holds the directory lock.
    #[error("storage directory is locked by another process: {0}")]
    Locked(String),

    /// A log entry could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}
