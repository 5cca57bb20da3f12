//! # Hisaab Storage
//!
//! Durable key-value backends for small pieces of sync bookkeeping
//! (watermarks, device preferences).
//!
//! Backends are **opaque byte stores** keyed by UTF-8 strings. They do not
//! interpret the values they hold; callers own the encoding.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral state
//! - [`FileBackend`] - Append-only log on disk, survives process restart
//!
//! ## Example
//!
//! ```rust
//! use hisaab_storage::{InMemoryBackend, KeyValueBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.put("last_sync_time_u1_b1", b"1700000000000").unwrap();
//! assert_eq!(
//!     backend.get("last_sync_time_u1_b1").unwrap(),
//!     Some(b"1700000000000".to_vec())
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::KeyValueBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
