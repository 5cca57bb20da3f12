//! In-memory storage backend for testing.

use crate::backend::KeyValueBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value backend.
///
/// This backend stores all data in memory and is primarily intended
/// for testing. Data is lost when the backend is dropped.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueBackend for InMemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.get("missing").unwrap(), None);
    }

    #[test]
    fn memory_put_and_get() {
        let backend = InMemoryBackend::new();
        backend.put("a", b"hello").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_overwrite() {
        let backend = InMemoryBackend::new();
        backend.put("a", b"one").unwrap();
        backend.put("a", b"two").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"two".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn memory_remove() {
        let backend = InMemoryBackend::new();
        backend.put("a", b"x").unwrap();
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn memory_keys_sorted() {
        let backend = InMemoryBackend::new();
        backend.put("b", b"2").unwrap();
        backend.put("a", b"1").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
