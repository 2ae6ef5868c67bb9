//! Structural hint cache.
//!
//! A cheap local-root summary (entry counts plus the newest modification
//! time) stored once per local root. When the current summary matches the
//! stored one and the snapshot is recent enough, a sync run can be
//! skipped without scanning or touching the network. Absence or staleness
//! only forfeits the optimization.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Cheap summary of a local root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralHint {
    pub total_dirs: u64,
    pub total_files: u64,
    /// Newest file modification time, unix seconds
    pub max_mtime: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredHint {
    pub hint: StructuralHint,
    pub recorded_at: DateTime<Utc>,
}

/// Compute the structural hint for a root. No file contents are read.
pub fn compute(root: &Path) -> StructuralHint {
    let mut hint = StructuralHint::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker.flatten() {
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_dir() {
            hint.total_dirs += 1;
        } else if entry.file_type().is_file() {
            hint.total_files += 1;
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    let secs = DateTime::<Utc>::from(modified).timestamp();
                    hint.max_mtime = hint.max_mtime.max(secs);
                }
            }
        }
    }

    hint
}

pub fn load(path: &Path) -> Option<StoredHint> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn store(path: &Path, hint: StructuralHint) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stored = StoredHint {
        hint,
        recorded_at: Utc::now(),
    };
    std::fs::write(path, serde_json::to_string_pretty(&stored)?)
}

/// Whether a sync run can be skipped for this root: the stored snapshot
/// is younger than the window and structurally identical to the current
/// state of the tree. A window of zero disables the shortcut.
pub fn should_skip(hint_path: &Path, root: &Path, window_minutes: u64) -> bool {
    if window_minutes == 0 {
        return false;
    }
    let Some(stored) = load(hint_path) else {
        return false;
    };
    if Utc::now() - stored.recorded_at > Duration::minutes(window_minutes as i64) {
        return false;
    }
    compute(root) == stored.hint
}
