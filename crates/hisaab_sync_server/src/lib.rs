//! # Hisaab Sync Server
//!
//! Reference in-memory sync backend for Hisaab.
//!
//! This crate provides:
//! - Push and pull handling for every entity endpoint
//! - Slug assignment (`PRD_42` style, per-kind counters)
//! - Monotonic server timestamps and stale-write rejection
//! - Reference checking against known slugs
//!
//! # Protocol
//!
//! 1. Client pushes `{list: [...]}` to a kind's push endpoint
//! 2. Server stamps accepted records with one batch time and reports
//!    accepted, assigned and rejected records
//! 3. Client pulls records updated after its watermark, page by page,
//!    ordered by server time

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use store::{RecordStore, StoredRecord};
