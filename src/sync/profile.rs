//! Sync profile resolution.
//!
//! A profile identifies one (local root, server URL, remote root path)
//! combination via a stable hash and owns the file locations for its own
//! metadata, the shared legacy metadata, and the local root's structural
//! hint. Profiles are looked up, never mutated.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Identity and file locations for one sync profile
#[derive(Debug, Clone)]
pub struct SyncProfile {
    /// Stable hash of (local root, server URL, remote root path)
    pub id: String,
    /// This profile's own metadata file
    pub metadata_path: PathBuf,
    /// The shared legacy metadata file (pre-profile format)
    pub legacy_path: PathBuf,
    /// Structural hint file for the local root (shared across profiles
    /// that use the same root)
    pub hint_path: PathBuf,
}

impl SyncProfile {
    /// Resolve the profile for a (local root, server URL, remote path)
    /// combination under the given data directory.
    pub fn resolve(
        data_dir: &Path,
        local_root: &Path,
        server_url: &str,
        remote_path: &str,
    ) -> Self {
        let root = local_root.to_string_lossy();
        let id = stable_id(&[
            root.as_ref(),
            server_url.trim_end_matches('/'),
            remote_path.trim_matches('/'),
        ]);
        let root_id = stable_id(&[root.as_ref()]);
        let sync_dir = data_dir.join("sync");
        Self {
            id: id.clone(),
            metadata_path: sync_dir.join(format!("{id}.json")),
            legacy_path: sync_dir.join("legacy.json"),
            hint_path: data_dir.join("hints").join(format!("{root_id}.json")),
        }
    }

    /// Whether this profile has never completed a sync
    pub fn is_first_sync(&self) -> bool {
        !self.metadata_path.exists()
    }

    /// Whether the shared legacy metadata file exists
    pub fn legacy_exists(&self) -> bool {
        self.legacy_path.exists()
    }
}

/// Default data directory for profile metadata and settings
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("shelfsync"))
}

fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..8])
}
