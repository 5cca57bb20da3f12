//! # Hisaab Sync Engine
//!
//! Offline-first sync between a local store and the Hisaab backend.
//!
//! This crate provides:
//! - Entity catalog with dependency ranks
//! - Dirty-flag change tracking over a [`LocalStore`]
//! - Retrying push/pull client with an HTTP transport
//! - Last-writer-wins conflict resolution
//! - The run orchestrator, with per-session single-flight
//! - Durable watermarks and a background scheduler
//!
//! ## Architecture
//!
//! A run walks the entity kinds in rank order. For each kind it:
//! 1. Pushes dirty local records, then marks them synced and rewrites
//!    `local_<id>` references in later records to the assigned slug
//! 2. Pulls records changed since the watermark and applies them, letting
//!    the resolver decide against dirty local rows
//!
//! ## Key Invariants
//!
//! - A kind is pushed only after every kind it references
//! - A failing kind never stops the others
//! - The watermark advances only after a clean run, and never backwards
//! - Slugs, once assigned, never change
//! - Re-running with no changes writes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod client;
mod clock;
mod config;
mod error;
mod http;
mod orchestrator;
mod progress;
mod resolver;
mod scheduler;
mod session;
mod state_store;
mod store;
mod tracker;
mod transport;

pub use catalog::{descriptor, ordered_entity_types, referrers_of, EntityTypeDescriptor};
pub use client::{PageProgress, RemoteSyncClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, SyncConfig, DEFAULT_BATCH_SIZE, DEFAULT_SYNC_INTERVAL};
pub use error::{SyncError, SyncResult};
pub use http::{HttpTransport, BUSINESS_HEADER};
pub use orchestrator::{
    EntityFailure, RejectedRecord, RunOutcome, SyncDirection, SyncOrchestrator, SyncReport,
    SyncState,
};
pub use progress::{Phase, ProgressReporter, SyncProgress};
pub use resolver::{ConflictResolver, Winner};
pub use scheduler::BackgroundSync;
pub use session::{SessionContext, SessionKey};
pub use state_store::{SyncStateStore, SyncWatermark};
pub use store::{
    ClearOutcome, LocalStore, MemoryLocalStore, SyncedStamp, UpsertOutcome, WriteGuard,
};
pub use tracker::{unresolved_references, ApplyOutcome, ChangeTracker};
pub use transport::{MockCall, MockTransport, SyncTransport};
