//! Per-page progress reporting.

use hisaab_sync_protocol::EntityKind;
use std::fmt;
use tokio::sync::watch;

/// The half of a per-kind step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Sending local changes.
    Push,
    /// Fetching remote changes.
    Pull,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Push => "push",
            Phase::Pull => "pull",
        })
    }
}

/// Progress within one entity kind's push or pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// Kind being synced.
    pub entity: EntityKind,
    /// Push or pull.
    pub direction: Phase,
    /// Records handled so far.
    pub completed: u64,
    /// Records expected in total.
    pub total: u64,
}

impl SyncProgress {
    /// Returns completion as a percentage, 0 when `total` is 0.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64) * 100.0
    }
}

/// Single-writer, multi-reader progress channel.
///
/// Not persisted: a subscriber that arrives after a run sees `None`.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<Option<SyncProgress>>,
}

impl ProgressReporter {
    /// Creates a reporter with no progress.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publishes a progress update.
    pub fn emit(&self, progress: SyncProgress) {
        self.tx.send_replace(Some(progress));
    }

    /// Clears progress at the end of a run.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Returns the latest progress, if a run is reporting.
    pub fn current(&self) -> Option<SyncProgress> {
        *self.tx.borrow()
    }

    /// Subscribes to progress updates.
    pub fn observe(&self) -> watch::Receiver<Option<SyncProgress>> {
        self.tx.subscribe()
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
