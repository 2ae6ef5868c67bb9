//! User decision callbacks.
//!
//! The engine presents choices through this trait and blocks on the
//! answer; the UI layer owns the actual dialogs. No default is assumed
//! silently beyond the documented per-strategy behavior.

use async_trait::async_trait;

/// Answer to a conflict prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Local,
    Remote,
    Cancel,
}

/// Answer to a yes/no prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirm,
    Cancel,
}

/// Decision callbacks the engine consumes
#[async_trait]
pub trait SyncPrompter: Send + Sync {
    /// Both sides changed a file; pick a side or cancel
    async fn ask_conflict(&self, path: &str) -> ConflictChoice;

    /// The local copy vanished; confirm propagating the deletion to the
    /// remote (cancel restores the file instead)
    async fn ask_local_deleted(&self, path: &str) -> Confirmation;

    /// The remote copy vanished; confirm deleting the local copy
    async fn ask_remote_deleted(&self, path: &str) -> Confirmation;

    /// A local file the remote has never seen; confirm uploading it
    async fn ask_upload_new(&self, path: &str) -> Confirmation;
}

/// Prompter that declines every question; used for headless runs where
/// no UI is attached.
pub struct DeclineAll;

#[async_trait]
impl SyncPrompter for DeclineAll {
    async fn ask_conflict(&self, _path: &str) -> ConflictChoice {
        ConflictChoice::Cancel
    }

    async fn ask_local_deleted(&self, _path: &str) -> Confirmation {
        Confirmation::Cancel
    }

    async fn ask_remote_deleted(&self, _path: &str) -> Confirmation {
        Confirmation::Cancel
    }

    async fn ask_upload_new(&self, _path: &str) -> Confirmation {
        Confirmation::Cancel
    }
}
