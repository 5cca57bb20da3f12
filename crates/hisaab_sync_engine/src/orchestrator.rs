//! The sync run state machine.
//!
//! A run walks the catalog in dependency order. For each kind it pushes
//! pending local changes, then pulls remote changes since the watermark.
//! Failures are collected per kind; only a clean run advances the
//! watermark.

use crate::catalog;
use crate::client::RemoteSyncClient;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::progress::{Phase, ProgressReporter, SyncProgress};
use crate::session::{SessionContext, SessionKey};
use crate::state_store::{SyncStateStore, SyncWatermark};
use crate::store::LocalStore;
use crate::tracker::{unresolved_references, ChangeTracker};
use crate::transport::SyncTransport;
use hisaab_storage::KeyValueBackend;
use hisaab_sync_protocol::time::{epoch, format_iso8601};
use hisaab_sync_protocol::{EntityKind, LocalId, PushResult, SyncRecord, Timestamp};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDirection {
    /// Send local changes.
    pub push: bool,
    /// Fetch remote changes.
    pub pull: bool,
}

impl SyncDirection {
    /// Push and pull.
    pub const BOTH: SyncDirection = SyncDirection::new(true, true);
    /// Push only. Never moves the watermark.
    pub const PUSH_ONLY: SyncDirection = SyncDirection::new(true, false);
    /// Pull only.
    pub const PULL_ONLY: SyncDirection = SyncDirection::new(false, true);

    /// Creates a direction from the two flags.
    pub const fn new(push: bool, pull: bool) -> Self {
        Self { push, pull }
    }
}

impl Default for SyncDirection {
    fn default() -> Self {
        Self::BOTH
    }
}

/// Observable orchestrator state.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncState {
    /// No run has happened, or the last one was cancelled or dropped.
    Idle,
    /// A run has started.
    InProgress,
    /// A run is reporting progress.
    Progress(SyncProgress),
    /// The last run finished cleanly.
    Success {
        /// The session's watermark after the run.
        last_sync_time: Option<Timestamp>,
    },
    /// The last run finished with failures.
    Error {
        /// Aggregated failure message.
        message: String,
        /// Phases the failed run performed.
        direction: SyncDirection,
    },
}

impl SyncState {
    /// Returns true if a run is underway.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::InProgress | SyncState::Progress(_))
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every kind completed every requested phase.
    Success,
    /// At least one kind failed.
    Failed,
    /// The run was cancelled at a page boundary.
    Cancelled,
}

/// One kind's failure within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    /// Kind that failed.
    pub entity: EntityKind,
    /// Phase that failed.
    pub phase: Phase,
    /// The error.
    pub error: SyncError,
}

/// A record the server refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Kind of the record.
    pub entity: EntityKind,
    /// Local id of the record.
    pub local_id: Option<LocalId>,
    /// The server's reason.
    pub reason: String,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Correlates log lines of this run.
    pub run_id: Uuid,
    /// Phases performed.
    pub direction: SyncDirection,
    /// Records accepted by the server and marked synced.
    pub pushed: u64,
    /// Records received from the server.
    pub pulled: u64,
    /// Pulled records that changed the local store.
    pub applied: u64,
    /// Records held back because they still reference unpushed records.
    pub deferred: u64,
    /// Records the server refused.
    pub rejected: Vec<RejectedRecord>,
    /// Per-kind failures.
    pub failures: Vec<EntityFailure>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// The watermark written by this run, if it advanced.
    pub watermark: Option<Timestamp>,
}

impl SyncReport {
    fn new(run_id: Uuid, direction: SyncDirection) -> Self {
        Self {
            run_id,
            direction,
            pushed: 0,
            pulled: 0,
            applied: 0,
            deferred: 0,
            rejected: Vec::new(),
            failures: Vec::new(),
            outcome: RunOutcome::Success,
            watermark: None,
        }
    }

    /// Returns true if the run finished cleanly.
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Returns the failures for one kind.
    pub fn failures_for(&self, entity: EntityKind) -> Vec<&EntityFailure> {
        self.failures.iter().filter(|f| f.entity == entity).collect()
    }

    fn failure_message(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{} {}: {}", f.entity, f.phase, f.error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

type SharedResult = Option<SyncResult<SyncReport>>;

struct Flight {
    result: watch::Receiver<SharedResult>,
    cancel: Arc<AtomicBool>,
}

/// Removes a flight from the table when its leader finishes or is dropped.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<SessionKey, Flight>>,
    key: SessionKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.lock().remove(&self.key);
    }
}

enum Entry {
    Join(watch::Receiver<SharedResult>),
    Lead(watch::Sender<SharedResult>, Arc<AtomicBool>),
}

/// State and progress channels of one (business, user).
struct SessionChannels {
    state: watch::Sender<SyncState>,
    progress: ProgressReporter,
}

impl SessionChannels {
    fn new() -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            state,
            progress: ProgressReporter::new(),
        }
    }

    fn emit(&self, entity: EntityKind, direction: Phase, completed: u64, total: u64) {
        let progress = SyncProgress {
            entity,
            direction,
            completed,
            total,
        };
        self.progress.emit(progress);
        self.state.send_replace(SyncState::Progress(progress));
    }
}

/// What a leading run works against.
struct RunScope<'a> {
    key: &'a SessionKey,
    channels: &'a SessionChannels,
    cancel: &'a AtomicBool,
}

/// Clears progress and returns the state to `Idle` if a run is dropped
/// before it publishes its outcome.
struct RunReset<'a> {
    channels: &'a SessionChannels,
    armed: bool,
}

impl Drop for RunReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("sync run dropped before finishing");
            self.channels.progress.clear();
            self.channels.state.send_replace(SyncState::Idle);
        }
    }
}

/// Drives sync runs.
///
/// At most one run is in flight per (business, user). A trigger that
/// arrives during a run waits for that run and returns its result. Each
/// (business, user) has its own state and progress channels, so runs for
/// different sessions never overwrite each other's.
pub struct SyncOrchestrator<S: LocalStore, T: SyncTransport> {
    tracker: ChangeTracker<S>,
    client: RemoteSyncClient<T>,
    state_store: SyncStateStore,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionKey, Arc<SessionChannels>>>,
    flights: Mutex<HashMap<SessionKey, Flight>>,
}

impl<S: LocalStore, T: SyncTransport> SyncOrchestrator<S, T> {
    /// Creates an orchestrator.
    ///
    /// `backend` holds the watermarks and must be durable in production.
    pub fn new(
        store: Arc<S>,
        transport: T,
        config: SyncConfig,
        backend: Arc<dyn KeyValueBackend>,
    ) -> Self {
        Self {
            tracker: ChangeTracker::new(store),
            client: RemoteSyncClient::new(transport, config),
            state_store: SyncStateStore::new(backend),
            clock: Arc::new(SystemClock),
            sessions: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &ChangeTracker<S> {
        &self.tracker
    }

    /// Returns the remote client.
    pub fn client(&self) -> &RemoteSyncClient<T> {
        &self.client
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        self.client.config()
    }

    /// Returns the watermark store.
    pub fn state_store(&self) -> &SyncStateStore {
        &self.state_store
    }

    /// Subscribes to the session's run state.
    pub fn state(&self, session: &SessionContext) -> SyncResult<watch::Receiver<SyncState>> {
        let key = session.require_valid()?;
        Ok(self.channels(&key).state.subscribe())
    }

    /// Subscribes to the session's progress updates.
    pub fn progress(
        &self,
        session: &SessionContext,
    ) -> SyncResult<watch::Receiver<Option<SyncProgress>>> {
        let key = session.require_valid()?;
        Ok(self.channels(&key).progress.observe())
    }

    fn channels(&self, key: &SessionKey) -> Arc<SessionChannels> {
        self.sessions
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(SessionChannels::new()))
            .clone()
    }

    /// Returns the session's watermark.
    pub fn last_sync_time(&self, session: &SessionContext) -> SyncResult<Option<Timestamp>> {
        let key = session.require_valid()?;
        Ok(self.state_store.get(&key)?.map(|w| w.last_sync_time))
    }

    /// Subscribes to the session's watermark.
    pub fn observe_last_sync_time(
        &self,
        session: &SessionContext,
    ) -> SyncResult<watch::Receiver<Option<SyncWatermark>>> {
        self.state_store.observe(&session.require_valid()?)
    }

    /// Returns true if the session has never synced or its sync interval
    /// has elapsed.
    pub fn should_sync(&self, session: &SessionContext) -> SyncResult<bool> {
        let key = session.require_valid()?;
        self.state_store
            .should_sync(&key, self.clock.now(), self.config().sync_interval)
    }

    /// Resets the session's watermark so the next run pulls everything.
    pub fn force_full_resync(&self, session: &SessionContext) -> SyncResult<()> {
        let key = session.require_valid()?;
        info!(business = %key.business_id, "watermark reset for full resync");
        self.state_store.reset(&key)
    }

    /// Returns true if a run is in flight for the session.
    pub fn is_running(&self, session: &SessionContext) -> bool {
        match session.require_valid() {
            Ok(key) => self.flights.lock().contains_key(&key),
            Err(_) => false,
        }
    }

    /// Cancels every in-flight run at its next page boundary.
    pub fn cancel(&self) {
        for flight in self.flights.lock().values() {
            flight.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// Runs both phases, as `syncData(syncUp, syncDown)`.
    pub async fn sync_data(
        &self,
        session: &SessionContext,
        sync_up: bool,
        sync_down: bool,
    ) -> SyncResult<SyncReport> {
        self.run(session, SyncDirection::new(sync_up, sync_down)).await
    }

    /// Runs a sync for `session`, or joins the one already in flight.
    ///
    /// Per-kind failures do not make this return `Err`; they are listed in
    /// the report, whose outcome is then `Failed`.
    ///
    /// # Errors
    ///
    /// `InvalidSession` before anything is touched; `StateStore` if the
    /// watermark cannot be read or written.
    pub async fn run(
        &self,
        session: &SessionContext,
        direction: SyncDirection,
    ) -> SyncResult<SyncReport> {
        let key = session.require_valid()?;

        let entry = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some(flight) => Entry::Join(flight.result.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    let cancel = Arc::new(AtomicBool::new(false));
                    flights.insert(
                        key.clone(),
                        Flight {
                            result: rx,
                            cancel: cancel.clone(),
                        },
                    );
                    Entry::Lead(tx, cancel)
                }
            }
        };

        match entry {
            Entry::Join(rx) => {
                debug!(business = %key.business_id, "joining in-flight sync run");
                wait_for(rx).await
            }
            Entry::Lead(tx, cancel) => {
                let guard = FlightGuard {
                    flights: &self.flights,
                    key: key.clone(),
                };
                let channels = self.channels(&key);
                let scope = RunScope {
                    key: &key,
                    channels: channels.as_ref(),
                    cancel: &cancel,
                };
                let result = self.execute(&scope, direction).await;
                drop(guard);
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }

    async fn execute(&self, scope: &RunScope<'_>, direction: SyncDirection) -> SyncResult<SyncReport> {
        let key = scope.key;
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync_run",
            %run_id,
            business = %key.business_id,
            user = %key.user_id
        );
        async {
            let mut reset = RunReset {
                channels: scope.channels,
                armed: true,
            };
            scope.channels.state.send_replace(SyncState::InProgress);
            let result = self.run_catalog(scope, direction, run_id).await;
            scope.channels.progress.clear();
            match &result {
                Ok(report) => self.publish_outcome(scope, report),
                Err(e) => {
                    error!(error = %e, "sync run aborted");
                    scope.channels.state.send_replace(SyncState::Error {
                        message: e.to_string(),
                        direction,
                    });
                }
            }
            reset.armed = false;
            result
        }
        .instrument(span)
        .await
    }

    async fn run_catalog(
        &self,
        scope: &RunScope<'_>,
        direction: SyncDirection,
        run_id: Uuid,
    ) -> SyncResult<SyncReport> {
        let key = scope.key;
        let started_at = self.clock.now();
        let since = self
            .state_store
            .get(key)?
            .map(|w| w.last_sync_time)
            .unwrap_or_else(epoch);
        info!(
            since = %format_iso8601(&since),
            push = direction.push,
            pull = direction.pull,
            "sync run started"
        );

        let mut report = SyncReport::new(run_id, direction);

        'kinds: for descriptor in catalog::ordered_entity_types() {
            let kind = descriptor.kind;
            let phases = [
                (Phase::Push, direction.push && descriptor.is_pushable()),
                (Phase::Pull, direction.pull),
            ];
            for (phase, enabled) in phases {
                if !enabled {
                    continue;
                }
                if scope.cancel.load(Ordering::SeqCst) {
                    report.outcome = RunOutcome::Cancelled;
                    break 'kinds;
                }
                let step = match phase {
                    Phase::Push => self.push_kind(scope, kind, &mut report).await,
                    Phase::Pull => self.pull_kind(scope, kind, since, &mut report).await,
                };
                match step {
                    Ok(()) => {}
                    Err(SyncError::Cancelled) => {
                        report.outcome = RunOutcome::Cancelled;
                        break 'kinds;
                    }
                    Err(e) => {
                        error!(entity = %kind, %phase, error = %e, "entity type failed, moving on");
                        report.failures.push(EntityFailure {
                            entity: kind,
                            phase,
                            error: e,
                        });
                        continue 'kinds;
                    }
                }
            }
        }

        if report.outcome != RunOutcome::Cancelled && !report.failures.is_empty() {
            report.outcome = RunOutcome::Failed;
        }

        if report.outcome == RunOutcome::Success && direction.pull {
            if self.state_store.set(key, started_at)? {
                report.watermark = Some(started_at);
            }
        }

        info!(
            outcome = ?report.outcome,
            pushed = report.pushed,
            pulled = report.pulled,
            applied = report.applied,
            deferred = report.deferred,
            rejected = report.rejected.len(),
            failures = report.failures.len(),
            "sync run finished"
        );
        Ok(report)
    }

    /// Pushes a kind's pending records in rounds until no more become
    /// ready. A round can free records of the same kind that referenced a
    /// record pushed in the previous round.
    async fn push_kind(
        &self,
        scope: &RunScope<'_>,
        kind: EntityKind,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let business = scope.key.business_id.as_str();
        let mut attempted: HashSet<LocalId> = HashSet::new();

        loop {
            let pending = self.tracker.pending_local_changes(kind, business).await?;
            let (ready, deferred): (Vec<SyncRecord>, Vec<SyncRecord>) = pending
                .into_iter()
                .filter(|r| r.local_id.map_or(true, |id| !attempted.contains(&id)))
                .partition(|r| unresolved_references(r).is_empty());

            if ready.is_empty() {
                for record in &deferred {
                    warn!(
                        entity = %kind,
                        local_id = record.local_id.map_or(0, |id| id.0),
                        fields = ?unresolved_references(record),
                        "deferring record with unresolved references"
                    );
                }
                report.deferred += deferred.len() as u64;
                return Ok(());
            }

            if scope.cancel.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled);
            }
            attempted.extend(ready.iter().filter_map(|r| r.local_id));
            self.push_round(scope, kind, &ready, report).await?;
        }
    }

    /// Pushes `ready` batch by batch. Each batch's result is stamped onto
    /// the local rows before the next batch is sent.
    ///
    /// A failed batch stops the round; a record that cannot be stamped does
    /// not. Either way the first error is returned once the round ends.
    async fn push_round(
        &self,
        scope: &RunScope<'_>,
        kind: EntityKind,
        ready: &[SyncRecord],
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let business = scope.key.business_id.as_str();
        let total = ready.len() as u64;
        let mut done: u64 = 0;
        let mut first_error: Option<SyncError> = None;
        scope.channels.emit(kind, Phase::Push, 0, total);

        for batch in self.client.batches(ready) {
            if done > 0 && scope.cancel.load(Ordering::SeqCst) {
                first_error.get_or_insert(SyncError::Cancelled);
                break;
            }
            let result = match self.client.push_batch(kind, business, batch).await {
                Ok(result) => result,
                Err(e) => {
                    first_error.get_or_insert(e);
                    break;
                }
            };
            for record in batch {
                if let Err(e) = self.apply_pushed(business, kind, record, &result, report).await {
                    error!(
                        entity = %kind,
                        local_id = record.local_id.map_or(0, |id| id.0),
                        error = %e,
                        "cannot stamp pushed record"
                    );
                    first_error.get_or_insert(e);
                }
                done += 1;
                scope.channels.emit(kind, Phase::Push, done, total);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Records the server's verdict on one pushed record.
    async fn apply_pushed(
        &self,
        business: &str,
        kind: EntityKind,
        record: &SyncRecord,
        result: &PushResult,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        if let Some(reason) = record.local_id.and_then(|id| result.rejected.get(&id)) {
            warn!(
                entity = %kind,
                local_id = record.local_id.map_or(0, |id| id.0),
                reason = %reason,
                "server rejected record"
            );
            report.rejected.push(RejectedRecord {
                entity: kind,
                local_id: record.local_id,
                reason: reason.clone(),
            });
            return Ok(());
        }

        let assigned = record
            .local_id
            .and_then(|id| result.assigned_slugs.get(&id));
        match record.slug.as_ref().or(assigned) {
            Some(slug) if result.accepted_slugs.contains(slug) => {
                self.tracker
                    .mark_synced(record, slug.clone(), result.server_time)
                    .await?;
                report.pushed += 1;
                if record.slug.is_none() {
                    if let Some(local_id) = record.local_id {
                        self.tracker
                            .rewrite_references(business, kind, local_id, slug)
                            .await?;
                    }
                }
            }
            _ => {
                warn!(
                    entity = %kind,
                    local_id = record.local_id.map_or(0, |id| id.0),
                    "record missing from push response"
                );
                report.rejected.push(RejectedRecord {
                    entity: kind,
                    local_id: record.local_id,
                    reason: "not acknowledged by server".into(),
                });
            }
        }
        Ok(())
    }

    async fn pull_kind(
        &self,
        scope: &RunScope<'_>,
        kind: EntityKind,
        since: Timestamp,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let business = scope.key.business_id.as_str();
        let cancel = scope.cancel;
        let channels = scope.channels;
        let records = self
            .client
            .pull(kind, business, since, |page| {
                if cancel.load(Ordering::SeqCst) {
                    return Err(SyncError::Cancelled);
                }
                channels.emit(kind, Phase::Pull, page.fetched, page.total);
                Ok(())
            })
            .await?;

        for remote in records {
            match self.tracker.apply_remote_record(business, remote).await {
                Ok(outcome) => {
                    report.pulled += 1;
                    if outcome.wrote() {
                        report.applied += 1;
                    }
                }
                Err(e @ SyncError::ConflictResolution { .. }) => {
                    warn!(entity = %kind, error = %e, "skipping record that cannot be resolved");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn publish_outcome(&self, scope: &RunScope<'_>, report: &SyncReport) {
        let state = match report.outcome {
            RunOutcome::Success => SyncState::Success {
                last_sync_time: self
                    .state_store
                    .get(scope.key)
                    .ok()
                    .flatten()
                    .map(|w| w.last_sync_time),
            },
            RunOutcome::Failed => SyncState::Error {
                message: report.failure_message(),
                direction: report.direction,
            },
            RunOutcome::Cancelled => SyncState::Idle,
        };
        scope.channels.state.send_replace(state);
    }
}

async fn wait_for(mut rx: watch::Receiver<SharedResult>) -> SyncResult<SyncReport> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if rx.changed().await.is_err() {
            // Leader dropped without publishing.
            return rx.borrow().clone().unwrap_or(Err(SyncError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryLocalStore;
    use crate::transport::MockTransport;
    use hisaab_storage::InMemoryBackend;
    use hisaab_sync_protocol::time::from_millis;
    use hisaab_sync_protocol::{Payload, PullData, PullResponse, PushData, PushResponse, Slug};

    fn orchestrator() -> (
        Arc<MemoryLocalStore>,
        SyncOrchestrator<MemoryLocalStore, Arc<MockTransport>>,
        Arc<MockTransport>,
    ) {
        let store = Arc::new(MemoryLocalStore::new());
        let transport = Arc::new(MockTransport::new());
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            transport.clone(),
            SyncConfig::new("http://test").with_retry(crate::RetryConfig::no_retry()),
            Arc::new(InMemoryBackend::new()),
        )
        .with_clock(Arc::new(ManualClock::new(from_millis(1_000_000).unwrap())));
        (store, orchestrator, transport)
    }

    fn empty_pages(transport: &MockTransport, count: usize) {
        for _ in 0..count {
            transport.queue_pull(Ok(PullResponse::ok(PullData::default(), epoch())));
        }
    }

    #[tokio::test]
    async fn rejects_signed_out_session() {
        let (_, orchestrator, transport) = orchestrator();
        let err = orchestrator
            .run(&SessionContext::signed_out(), SyncDirection::BOTH)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidSession(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn clean_pull_advances_watermark_to_run_start() {
        let (_, orchestrator, transport) = orchestrator();
        empty_pages(&transport, EntityKind::ALL.len());
        let session = SessionContext::new("B1", "U1");

        let report = orchestrator.run(&session, SyncDirection::BOTH).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.watermark, from_millis(1_000_000));
        assert_eq!(
            orchestrator.last_sync_time(&session).unwrap(),
            from_millis(1_000_000)
        );
        assert!(matches!(
            *orchestrator.state(&session).unwrap().borrow(),
            SyncState::Success { .. }
        ));
    }

    #[tokio::test]
    async fn push_only_run_leaves_watermark_alone() {
        let (store, orchestrator, transport) = orchestrator();
        store.insert(SyncRecord::new_local(
            EntityKind::Category,
            LocalId(1),
            "B1",
            Payload::new(),
            epoch(),
        ));
        let mut data = PushData::default();
        data.accepted.push(Slug::new("CAT_1"));
        data.assigned.insert(LocalId(1), Slug::new("CAT_1"));
        transport.queue_push(Ok(PushResponse::ok(data, epoch())));

        let session = SessionContext::new("B1", "U1");
        let report = orchestrator
            .run(&session, SyncDirection::PUSH_ONLY)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.pushed, 1);
        assert_eq!(report.watermark, None);
        assert_eq!(orchestrator.last_sync_time(&session).unwrap(), None);
        let row = store.get(EntityKind::Category, LocalId(1)).unwrap();
        assert!(!row.dirty);
        assert_eq!(row.slug, Some(Slug::new("CAT_1")));
    }

    #[tokio::test]
    async fn failed_kind_is_reported_and_run_continues() {
        let (_, orchestrator, transport) = orchestrator();
        transport.queue_pull(Ok(PullResponse::error(400, "bad category query")));
        empty_pages(&transport, EntityKind::ALL.len() - 1);
        let session = SessionContext::new("B1", "U1");

        let report = orchestrator.run(&session, SyncDirection::PULL_ONLY).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].entity, EntityKind::Category);
        assert_eq!(report.failures[0].phase, Phase::Pull);
        assert_eq!(transport.call_count(), EntityKind::ALL.len());
        assert_eq!(orchestrator.last_sync_time(&session).unwrap(), None);
        assert!(matches!(
            *orchestrator.state(&session).unwrap().borrow(),
            SyncState::Error { .. }
        ));
    }

    #[tokio::test]
    async fn force_full_resync_clears_watermark() {
        let (_, orchestrator, transport) = orchestrator();
        empty_pages(&transport, EntityKind::ALL.len());
        let session = SessionContext::new("B1", "U1");
        orchestrator.run(&session, SyncDirection::BOTH).await.unwrap();
        assert!(!orchestrator.should_sync(&session).unwrap());

        orchestrator.force_full_resync(&session).unwrap();
        assert_eq!(orchestrator.last_sync_time(&session).unwrap(), None);
        assert!(orchestrator.should_sync(&session).unwrap());
    }
}
