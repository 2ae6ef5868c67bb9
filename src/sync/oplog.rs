//! Operational log sink.
//!
//! An append-only textual log of every sync decision and transport
//! attempt. When the file exceeds the size threshold it is rotated to
//! `<name>.old`, replacing the previous rotation. Logging is best-effort:
//! a failure to write never affects the sync run.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Rotation threshold
const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

pub struct OpLog {
    path: PathBuf,
    max_bytes: u64,
}

impl OpLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line
    pub fn append(&self, line: &str) {
        self.rotate_if_needed();
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{} {}", Utc::now().to_rfc3339(), line));
        if let Err(err) = result {
            log::debug!("OpLog: failed to append to {}: {}", self.path.display(), err);
        }
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < self.max_bytes {
            return;
        }
        let rotated = self.path.with_extension("log.old");
        if let Err(err) = std::fs::rename(&self.path, &rotated) {
            log::debug!("OpLog: rotation failed for {}: {}", self.path.display(), err);
        }
    }
}
