//! Storage backend trait definition.

use crate::error::StorageResult;

/// A durable key-value backend.
///
/// Backends are **opaque byte stores**. They map string keys to byte values
/// and never look inside the values.
///
/// # Invariants
///
/// - `get` returns exactly the bytes last written with `put` for that key
/// - A `put` that returned `Ok` is durable for persistent backends
/// - `remove` of a missing key is not an error
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait KeyValueBackend: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`.
    ///
    /// Returns `true` if a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be made durable.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// Returns all keys currently stored, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is closed.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;
}
