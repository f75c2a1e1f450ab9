//! Removal of abandoned drafts and stale editable-message handles.

use crate::config::HANDLE_MAX_AGE_SECS;
use crate::storage::{StorageError, StorageProvider};
use tracing::{debug, info};

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Expired drafts
    pub drafts: u64,
    /// Handles older than [`HANDLE_MAX_AGE_SECS`]
    pub handles: u64,
}

/// Delete drafts idle for longer than `draft_ttl_secs` and handles older than a
/// day, as seen at `now`. A TTL of `0` keeps drafts.
///
/// # Errors
///
/// Returns a `StorageError` if either delete fails.
pub async fn purge_stale(
    storage: &dyn StorageProvider,
    now: i64,
    draft_ttl_secs: u64,
) -> Result<PurgeStats, StorageError> {
    let mut stats = PurgeStats::default();

    if let Ok(ttl) = i64::try_from(draft_ttl_secs) {
        if ttl > 0 {
            stats.drafts = storage.delete_drafts_older_than(now - ttl).await?;
        }
    }
    stats.handles = storage
        .delete_handles_older_than(now - HANDLE_MAX_AGE_SECS)
        .await?;

    if stats == PurgeStats::default() {
        debug!("Purge found nothing to remove");
    } else {
        info!(
            drafts = stats.drafts,
            handles = stats.handles,
            "Purged stale drafts and handles"
        );
    }
    Ok(stats)
}
