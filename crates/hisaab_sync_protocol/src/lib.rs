//! # Hisaab Sync Protocol
//!
//! Sync record types and JSON wire messages for Hisaab.
//!
//! This crate provides:
//! - `EntityKind` for the syncable entity types, with their endpoints and
//!   reference fields
//! - `Slug` and `LocalId` identifiers
//! - `SyncRecord`, the envelope the engine moves between stores
//! - Push and pull messages in the backend's JSON shape
//! - ISO-8601 timestamp helpers
//! - Payload sanitization applied before push
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod messages;
mod record;
pub mod sanitize;
pub mod time;

pub use entity::{EntityKind, FieldRef, RefTarget};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ApiEnvelope, PullData, PullQuery, PullResponse, PushData, PushRequest, PushResponse,
    PushResult, RemoteRecord, ResultCount, WireRecord, STATUS_OK,
};
pub use record::{LocalId, Payload, Slug, SyncRecord};
pub use time::Timestamp;
