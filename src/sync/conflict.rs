//! Conflict resolution strategies.

use chrono::{DateTime, Utc};

use super::config::ConflictStrategy;
use super::prompt::{ConflictChoice, SyncPrompter};

/// Outcome of resolving a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    UploadLocal,
    DownloadRemote,
    /// Leave both sides untouched this run
    Skip,
}

/// Resolve a conflict for one path with the configured strategy. Applied
/// uniformly to ordinary conflicts and to the ambiguous Safe-Pull cases.
pub async fn resolve(
    strategy: ConflictStrategy,
    prompter: &dyn SyncPrompter,
    path: &str,
    local_mtime: Option<DateTime<Utc>>,
    remote_mtime: Option<DateTime<Utc>>,
) -> Resolution {
    match strategy {
        ConflictStrategy::Ask => match prompter.ask_conflict(path).await {
            ConflictChoice::Local => Resolution::UploadLocal,
            ConflictChoice::Remote => Resolution::DownloadRemote,
            ConflictChoice::Cancel => Resolution::Skip,
        },
        ConflictStrategy::Newest => match (local_mtime, remote_mtime) {
            // Ties favor local
            (Some(local), Some(remote)) if remote > local => Resolution::DownloadRemote,
            (None, Some(_)) => Resolution::DownloadRemote,
            _ => Resolution::UploadLocal,
        },
        ConflictStrategy::LastWins => Resolution::DownloadRemote,
    }
}
