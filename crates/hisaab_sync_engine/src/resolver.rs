//! Timestamp-based conflict resolution.

use crate::error::{SyncError, SyncResult};
use hisaab_sync_protocol::{Slug, SyncRecord};

/// Which side won a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The local version is kept.
    Local,
    /// The remote version replaces the local one.
    Remote,
}

/// Decides between a dirty local record and its remote counterpart.
///
/// The record with the strictly later update time wins in full; on a tie the
/// remote version wins. Fields are never merged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Returns which side wins.
    ///
    /// # Errors
    ///
    /// Returns `ConflictResolution` if either side lacks an update time.
    pub fn winner(&self, local: &SyncRecord, remote: &SyncRecord) -> SyncResult<Winner> {
        let slug = remote
            .slug
            .clone()
            .or_else(|| local.slug.clone())
            .unwrap_or_else(|| Slug::new("?"));
        let missing = |side: &str| SyncError::ConflictResolution {
            entity: remote.entity,
            slug: slug.clone(),
            reason: format!("{side} record has no update time"),
        };

        let local_at = local.effective_updated_at().ok_or_else(|| missing("local"))?;
        let remote_at = remote
            .effective_updated_at()
            .ok_or_else(|| missing("remote"))?;

        Ok(if local_at > remote_at {
            Winner::Local
        } else {
            Winner::Remote
        })
    }

    /// Returns the winning record.
    ///
    /// # Errors
    ///
    /// Returns `ConflictResolution` if either side lacks an update time.
    pub fn resolve(&self, local: SyncRecord, remote: SyncRecord) -> SyncResult<SyncRecord> {
        Ok(match self.winner(&local, &remote)? {
            Winner::Local => local,
            Winner::Remote => remote,
        })
    }
}
