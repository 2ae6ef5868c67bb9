//! Persisted per-profile sync metadata.
//!
//! One JSON document per sync profile records what the engine last
//! believed local and remote agreed on. It is loaded at the start of a
//! run, mutated in memory as the plan executes, and persisted atomically
//! at the end, successful items only. A shared legacy-format document is
//! kept in sync so pre-profile versions of the software keep working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Record of a file as last reconciled between local and remote.
///
/// Presence for a path means the engine previously observed local and
/// remote copies reconciled at `sync_time`; absence means the path was
/// never synced through this profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Content hash at last sync
    pub hash: String,
    /// Local modification time at last sync
    pub local_mtime: DateTime<Utc>,
    /// File size at last sync
    pub size: u64,
    /// When this file was last synced
    pub sync_time: DateTime<Utc>,
    /// Remote modification time at last sync, when the server reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_mtime: Option<DateTime<Utc>>,
    /// Remote ETag at last sync (for change detection)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_etag: Option<String>,
}

/// Remote directory property snapshot, recorded as a pruning hint only.
/// Its absence never blocks correctness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Sync metadata for one profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    #[serde(default)]
    pub files: HashMap<String, FileRecord>,
    #[serde(default)]
    pub dirs: HashMap<String, DirRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl SyncMetadata {
    /// Load from file. A missing file yields empty metadata. An
    /// unparsable file is backed up under a timestamped name and replaced
    /// with empty metadata instead of aborting the run.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("Metadata: failed to read {}: {}", path.display(), err);
                return Self::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(metadata) => metadata,
            Err(err) => {
                log::warn!(
                    "Metadata: {} is corrupt ({}), backing it up and starting empty",
                    path.display(),
                    err
                );
                backup_corrupt(path);
                Self::default()
            }
        }
    }

    /// Save to file atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)
    }
}

fn backup_corrupt(path: &Path) {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup = path.with_extension(format!("corrupt-{stamp}"));
    if let Err(err) = std::fs::rename(path, &backup) {
        log::warn!(
            "Metadata: failed to back up corrupt file {}: {}",
            path.display(),
            err
        );
    }
}

/// The shared pre-profile metadata document. Its `files` map is keyed by
/// `"<remote root>/<relative path>"` across all libraries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMetadata {
    #[serde(default)]
    pub files: HashMap<String, FileRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl LegacyMetadata {
    /// Load leniently: a missing or unparsable file yields an empty
    /// document. Safe-Pull activation only depends on the file existing.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        std::fs::read_to_string(path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }

    /// Extract the records belonging to one remote root, re-keyed by
    /// profile-relative path.
    pub fn records_for(&self, remote_root: &str) -> HashMap<String, FileRecord> {
        let prefix = format!("{}/", remote_root.trim_matches('/'));
        self.files
            .iter()
            .filter_map(|(key, record)| {
                key.strip_prefix(&prefix)
                    .map(|rel| (rel.to_string(), record.clone()))
            })
            .collect()
    }

    /// Re-merge one profile's records under its remote-root prefix,
    /// replacing whatever the document previously held for that root.
    pub fn merge_profile(&mut self, remote_root: &str, files: &HashMap<String, FileRecord>) {
        let root = remote_root.trim_matches('/');
        let prefix = format!("{root}/");
        self.files.retain(|key, _| !key.starts_with(&prefix));
        for (path, record) in files {
            self.files.insert(format!("{root}/{path}"), record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(hash: &str) -> FileRecord {
        FileRecord {
            hash: hash.to_string(),
            local_mtime: Utc::now(),
            size: 5,
            sync_time: Utc::now(),
            remote_mtime: None,
            remote_etag: Some("etag-1".to_string()),
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let metadata = SyncMetadata::load(&dir.path().join("absent.json"));
        assert!(metadata.files.is_empty());
        assert!(metadata.last_sync_time.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync").join("abc.json");

        let mut metadata = SyncMetadata::default();
        metadata.files.insert("notes/a.md".to_string(), record("h1"));
        metadata.last_sync_time = Some(Utc::now());
        metadata.save(&path).unwrap();

        let loaded = SyncMetadata::load(&path);
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files["notes/a.md"].hash, "h1");
        assert_eq!(
            loaded.files["notes/a.md"].remote_etag.as_deref(),
            Some("etag-1")
        );
    }

    #[test]
    fn test_corrupt_file_is_backed_up_and_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "{ not json").unwrap();

        let metadata = SyncMetadata::load(&path);
        assert!(metadata.files.is_empty());
        assert!(!path.exists());

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_legacy_records_for_root() {
        let mut legacy = LegacyMetadata::default();
        legacy.files.insert("notes/a.md".to_string(), record("h1"));
        legacy.files.insert("other/b.md".to_string(), record("h2"));

        let records = legacy.records_for("/notes/");
        assert_eq!(records.len(), 1);
        assert_eq!(records["a.md"].hash, "h1");
    }

    #[test]
    fn test_legacy_merge_replaces_root_entries() {
        let mut legacy = LegacyMetadata::default();
        legacy
            .files
            .insert("notes/stale.md".to_string(), record("h0"));
        legacy.files.insert("other/b.md".to_string(), record("h2"));

        let mut fresh = HashMap::new();
        fresh.insert("a.md".to_string(), record("h1"));
        legacy.merge_profile("notes", &fresh);

        assert!(!legacy.files.contains_key("notes/stale.md"));
        assert_eq!(legacy.files["notes/a.md"].hash, "h1");
        assert_eq!(legacy.files["other/b.md"].hash, "h2");
    }
}
