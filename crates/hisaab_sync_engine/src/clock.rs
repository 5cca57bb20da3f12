//! Wall-clock source for watermarks and interval checks.

use chrono::Utc;
use hisaab_sync_protocol::time::{from_millis, to_millis};
use hisaab_sync_protocol::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now".
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(to_millis(&at)),
        }
    }

    /// Sets the reading.
    pub fn set(&self, at: Timestamp) {
        self.millis.store(to_millis(&at), Ordering::SeqCst);
    }

    /// Moves the reading forward.
    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        from_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}
