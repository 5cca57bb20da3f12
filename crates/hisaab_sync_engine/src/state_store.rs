//! Durable per-session watermark.

use crate::error::{SyncError, SyncResult};
use crate::session::SessionKey;
use hisaab_storage::KeyValueBackend;
use hisaab_sync_protocol::time::{from_millis, to_millis};
use hisaab_sync_protocol::Timestamp;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Time of the last fully successful pull for one business and user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWatermark {
    /// Business slug.
    pub business_id: String,
    /// User slug.
    pub user_id: String,
    /// Clock reading taken when the successful run started.
    pub last_sync_time: Timestamp,
}

/// Stores one watermark per (business, user) in a key-value backend.
///
/// Values are epoch milliseconds under `last_sync_time_{user}_{business}`;
/// zero means no watermark.
pub struct SyncStateStore {
    backend: Arc<dyn KeyValueBackend>,
    watchers: Mutex<HashMap<SessionKey, watch::Sender<Option<SyncWatermark>>>>,
}

impl SyncStateStore {
    /// Creates a store over `backend`.
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the watermark for a session.
    pub fn get(&self, session: &SessionKey) -> SyncResult<Option<SyncWatermark>> {
        let Some(bytes) = self.backend.get(&storage_key(session))? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| SyncError::StateStore(format!("watermark is not UTF-8: {e}")))?;
        let millis: i64 = text
            .trim()
            .parse()
            .map_err(|e| SyncError::StateStore(format!("bad watermark {text:?}: {e}")))?;
        if millis == 0 {
            return Ok(None);
        }
        let last_sync_time = from_millis(millis)
            .ok_or_else(|| SyncError::StateStore(format!("watermark {millis} out of range")))?;
        Ok(Some(watermark(session, last_sync_time)))
    }

    /// Advances the watermark to `at`.
    ///
    /// Returns false, writing nothing, if the stored watermark is already
    /// later than `at`.
    pub fn set(&self, session: &SessionKey, at: Timestamp) -> SyncResult<bool> {
        if let Some(current) = self.get(session)? {
            if current.last_sync_time > at {
                debug!(
                    business = %session.business_id,
                    "refusing to move watermark backwards"
                );
                return Ok(false);
            }
        }
        self.write(session, to_millis(&at))?;
        self.notify(session, Some(watermark(session, at)));
        Ok(true)
    }

    /// Clears the watermark so the next pull starts from the epoch.
    pub fn reset(&self, session: &SessionKey) -> SyncResult<()> {
        self.write(session, 0)?;
        self.notify(session, None);
        Ok(())
    }

    /// Subscribes to watermark changes for a session.
    pub fn observe(
        &self,
        session: &SessionKey,
    ) -> SyncResult<watch::Receiver<Option<SyncWatermark>>> {
        let mut watchers = self.watchers.lock();
        if let Some(sender) = watchers.get(session) {
            return Ok(sender.subscribe());
        }
        // Read under the lock so a concurrent `set` cannot slip between the
        // read and the registration.
        let (sender, receiver) = watch::channel(self.get(session)?);
        watchers.insert(session.clone(), sender);
        Ok(receiver)
    }

    /// Returns true if no watermark exists or `interval` has elapsed since it.
    pub fn should_sync(
        &self,
        session: &SessionKey,
        now: Timestamp,
        interval: Duration,
    ) -> SyncResult<bool> {
        Ok(match self.get(session)? {
            None => true,
            Some(w) => match now.signed_duration_since(w.last_sync_time).to_std() {
                Ok(elapsed) => elapsed >= interval,
                // Watermark in the future: the clock moved back.
                Err(_) => false,
            },
        })
    }

    fn write(&self, session: &SessionKey, millis: i64) -> SyncResult<()> {
        self.backend
            .put(&storage_key(session), millis.to_string().as_bytes())?;
        Ok(())
    }

    fn notify(&self, session: &SessionKey, value: Option<SyncWatermark>) {
        if let Some(sender) = self.watchers.lock().get(session) {
            sender.send_replace(value);
        }
    }
}

fn storage_key(session: &SessionKey) -> String {
    format!("last_sync_time_{}_{}", session.user_id, session.business_id)
}

fn watermark(session: &SessionKey, last_sync_time: Timestamp) -> SyncWatermark {
    SyncWatermark {
        business_id: session.business_id.clone(),
        user_id: session.user_id.clone(),
        last_sync_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionContext;
    use hisaab_storage::{FileBackend, InMemoryBackend};

    fn session() -> SessionKey {
        SessionContext::new("B1", "U1").require_valid().unwrap()
    }

    fn ts(ms: i64) -> Timestamp {
        from_millis(ms).unwrap()
    }

    fn store() -> (Arc<InMemoryBackend>, SyncStateStore) {
        let backend = Arc::new(InMemoryBackend::new());
        (backend.clone(), SyncStateStore::new(backend))
    }

    #[test]
    fn stores_millis_under_session_key() {
        let (backend, store) = store();
        assert_eq!(store.get(&session()).unwrap(), None);

        store.set(&session(), ts(1_700_000_000_000)).unwrap();
        assert_eq!(
            backend.get("last_sync_time_U1_B1").unwrap(),
            Some(b"1700000000000".to_vec())
        );
        assert_eq!(
            store.get(&session()).unwrap().unwrap().last_sync_time,
            ts(1_700_000_000_000)
        );
    }

    #[test]
    fn never_moves_backwards() {
        let (_, store) = store();
        assert!(store.set(&session(), ts(2_000)).unwrap());
        assert!(!store.set(&session(), ts(1_000)).unwrap());
        assert_eq!(store.get(&session()).unwrap().unwrap().last_sync_time, ts(2_000));
    }

    #[test]
    fn reset_clears() {
        let (_, store) = store();
        store.set(&session(), ts(2_000)).unwrap();
        store.reset(&session()).unwrap();
        assert_eq!(store.get(&session()).unwrap(), None);
    }

    #[test]
    fn garbage_is_a_state_store_error() {
        let (backend, store) = store();
        backend.put("last_sync_time_U1_B1", b"yesterday").unwrap();
        assert!(matches!(store.get(&session()), Err(SyncError::StateStore(_))));
    }

    #[test]
    fn should_sync_after_interval() {
        let (_, store) = store();
        let interval = Duration::from_secs(120);
        assert!(store.should_sync(&session(), ts(0), interval).unwrap());

        store.set(&session(), ts(1_000_000)).unwrap();
        assert!(!store.should_sync(&session(), ts(1_060_000), interval).unwrap());
        assert!(store.should_sync(&session(), ts(1_120_000), interval).unwrap());
        assert!(!store.should_sync(&session(), ts(500_000), interval).unwrap());
    }

    #[tokio::test]
    async fn observers_see_updates() {
        let (_, store) = store();
        let mut rx = store.observe(&session()).unwrap();
        assert_eq!(*rx.borrow(), None);

        store.set(&session(), ts(5_000)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|w| w.last_sync_time),
            Some(ts(5_000))
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = Arc::new(FileBackend::open(dir.path()).unwrap());
            SyncStateStore::new(backend).set(&session(), ts(42_000)).unwrap();
        }
        let backend = Arc::new(FileBackend::open(dir.path()).unwrap());
        let store = SyncStateStore::new(backend);
        assert_eq!(store.get(&session()).unwrap().unwrap().last_sync_time, ts(42_000));
    }
}
