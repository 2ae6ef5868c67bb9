//! Local library scanning.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use super::hash::content_hash;
use super::metadata::SyncMetadata;

/// Document extensions the engine syncs
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// One side's observed state of a file during a scan. Local entries
/// always carry a hash; remote entries carry an etag when the server
/// reports one and never a hash.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Forward-slash relative path
    pub path: String,
    pub mtime: Option<DateTime<Utc>>,
    pub size: u64,
    pub hash: Option<String>,
    pub etag: Option<String>,
}

/// Whether a file name has a supported document extension
pub fn is_supported(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Walk the local root and index every supported document.
///
/// Dot-prefixed files and directories are skipped. When a prior record
/// exists with an identical size, its hash is reused without re-reading
/// the file. Per-entry I/O errors skip the entry; an unlistable directory
/// contributes nothing. Neither is fatal to the scan.
pub fn scan_local(root: &Path, last: &SyncMetadata) -> HashMap<String, FileEntry> {
    let mut entries = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("Local scan: skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !is_supported(&name) {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                log::debug!("Local scan: failed to stat {}: {}", rel, err);
                continue;
            }
        };
        let size = meta.len();
        let mtime = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(Some(DateTime::<Utc>::UNIX_EPOCH));

        let hash = match last.files.get(&rel) {
            Some(record) if record.size == size => record.hash.clone(),
            _ => match std::fs::read(entry.path()) {
                Ok(bytes) => content_hash(&bytes),
                Err(err) => {
                    log::debug!("Local scan: failed to read {}: {}", rel, err);
                    continue;
                }
            },
        };

        entries.insert(
            rel.clone(),
            FileEntry {
                path: rel,
                mtime,
                size,
                hash: Some(hash),
                etag: None,
            },
        );
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::metadata::FileRecord;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_scan_indexes_supported_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "alpha");
        write(dir.path(), "notes/b.markdown", "beta");
        write(dir.path(), "notes/c.txt", "gamma");
        write(dir.path(), "image.png", "not a document");

        let entries = scan_local(dir.path(), &SyncMetadata::default());
        assert_eq!(entries.len(), 3);
        assert!(entries.contains_key("a.md"));
        assert!(entries.contains_key("notes/b.markdown"));
        assert!(entries.contains_key("notes/c.txt"));
        assert_eq!(entries["a.md"].hash.as_deref(), Some(&content_hash(b"alpha")[..]));
    }

    #[test]
    fn test_scan_skips_dot_entries() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".hidden.md", "skip me");
        write(dir.path(), ".git/objects/x.md", "skip me too");
        write(dir.path(), "visible.md", "keep");

        let entries = scan_local(dir.path(), &SyncMetadata::default());
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("visible.md"));
    }

    #[test]
    fn test_scan_reuses_hash_when_size_unchanged() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "alpha");

        let mut last = SyncMetadata::default();
        last.files.insert(
            "a.md".to_string(),
            FileRecord {
                hash: "cached-hash".to_string(),
                local_mtime: Utc::now(),
                size: 5,
                sync_time: Utc::now(),
                remote_mtime: None,
                remote_etag: None,
            },
        );

        let entries = scan_local(dir.path(), &last);
        assert_eq!(entries["a.md"].hash.as_deref(), Some("cached-hash"));
    }

    #[test]
    fn test_scan_recomputes_hash_when_size_changed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "alpha extended");

        let mut last = SyncMetadata::default();
        last.files.insert(
            "a.md".to_string(),
            FileRecord {
                hash: "cached-hash".to_string(),
                local_mtime: Utc::now(),
                size: 5,
                sync_time: Utc::now(),
                remote_mtime: None,
                remote_etag: None,
            },
        );

        let entries = scan_local(dir.path(), &last);
        assert_eq!(
            entries["a.md"].hash.as_deref(),
            Some(&content_hash(b"alpha extended")[..])
        );
    }

    #[test]
    fn test_scan_of_two_identical_trees_agrees() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.md", "alpha");

        let first = scan_local(dir.path(), &SyncMetadata::default());
        let second = scan_local(dir.path(), &SyncMetadata::default());
        assert_eq!(first["a.md"].hash, second["a.md"].hash);
    }

    #[test]
    fn test_missing_root_is_empty_not_fatal() {
        let dir = tempdir().unwrap();
        let entries = scan_local(&dir.path().join("absent"), &SyncMetadata::default());
        assert!(entries.is_empty());
    }
}
