//! Periodic background sync.

use crate::orchestrator::{SyncDirection, SyncOrchestrator};
use crate::session::SessionContext;
use crate::store::LocalStore;
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A single repeating task that syncs the current session when its
/// interval has elapsed.
///
/// It goes through [`SyncOrchestrator::run`] like a manual trigger, so a
/// tick during a manual run joins that run. Stopped on drop.
pub struct BackgroundSync {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundSync {
    /// Spawns the task on the current tokio runtime.
    ///
    /// The first tick fires immediately. `sessions` carries the active
    /// session; ticks while signed out are skipped.
    pub fn start<S, T>(
        orchestrator: Arc<SyncOrchestrator<S, T>>,
        sessions: watch::Receiver<SessionContext>,
        interval: Duration,
    ) -> Self
    where
        S: LocalStore + 'static,
        T: SyncTransport + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "background sync started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(&orchestrator, &sessions).await,
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("background sync stopped");
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the task to stop after its current tick.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Returns true while the task is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "background sync task ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundSync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick<S: LocalStore, T: SyncTransport>(
    orchestrator: &SyncOrchestrator<S, T>,
    sessions: &watch::Receiver<SessionContext>,
) {
    let session = sessions.borrow().clone();
    if session.require_valid().is_err() {
        debug!("no active session, skipping background sync");
        return;
    }
    match orchestrator.should_sync(&session) {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            warn!(error = %e, "cannot read watermark, skipping background sync");
            return;
        }
    }
    match orchestrator.run(&session, SyncDirection::BOTH).await {
        Ok(report) if report.is_success() => {
            debug!(pushed = report.pushed, pulled = report.pulled, "background sync done");
        }
        Ok(report) => {
            warn!(outcome = ?report.outcome, failures = report.failures.len(), "background sync incomplete");
        }
        Err(e) => warn!(error = %e, "background sync failed"),
    }
}
