//! WebDAV library synchronization engine.
//!
//! Keeps a local directory tree of documents consistent with a copy on a
//! remote WebDAV server, across devices, with no central coordinator.
//! The flow of one run: scanners build the local and remote indexes, the
//! reconciler turns them into an action plan, the conflict resolver
//! settles both-changed paths, the executor applies the plan under a
//! deadline, and the metadata store records what the two sides now agree
//! on.

pub mod backoff;
pub mod config;
pub mod conflict;
pub mod executor;
pub mod hash;
pub mod hints;
pub mod metadata;
pub mod oplog;
pub mod profile;
pub mod prompt;
pub mod reconcile;
pub mod remote;
pub mod scanner;
pub mod webdav;

mod manager;

pub use backoff::Backoff;
pub use config::{
    ConflictStrategy, EncryptionSettings, LibraryConfig, LocalDeleteStrategy, SettingsStore,
    SyncCredentials, SyncPhase, SyncProgress, SyncReport, SyncSettings,
};
pub use conflict::Resolution;
pub use manager::{ProgressFn, SyncError, SyncManager};
pub use metadata::{DirRecord, FileRecord, LegacyMetadata, SyncMetadata};
pub use oplog::OpLog;
pub use profile::{default_data_dir, SyncProfile};
pub use prompt::{Confirmation, ConflictChoice, DeclineAll, SyncPrompter};
pub use reconcile::{reconcile, Action, ReconcileOptions};
pub use remote::{scan_remote, RemoteTree};
pub use scanner::{scan_local, FileEntry, SUPPORTED_EXTENSIONS};
pub use webdav::{Depth, HeadResponse, PutResponse, ResourceInfo, WebDAVClient, WebDAVError};
