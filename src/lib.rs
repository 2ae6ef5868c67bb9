//! shelfsync keeps a local library of documents consistent with a copy
//! stored on a remote WebDAV server.
//!
//! The crate is the synchronization engine only. Editors, file-tree
//! widgets, and dialogs live elsewhere and reach the engine through
//! narrow interfaces: a [`sync::SettingsStore`] for configuration, a
//! [`sync::SyncPrompter`] for user decisions, and a progress callback for
//! status display.
//!
//! ```no_run
//! use shelfsync::sync::{DeclineAll, LibraryConfig, SyncManager};
//!
//! # async fn run(config: LibraryConfig) -> Result<(), shelfsync::sync::SyncError> {
//! let data_dir = shelfsync::sync::default_data_dir().expect("no data directory");
//! let manager = SyncManager::new(data_dir);
//! let report = manager.sync_library(&config, &DeclineAll, None).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod sync;
