use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Strategy when both sides changed a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Present both versions to the user
    #[default]
    Ask,
    /// Pick the side with the newer modification time; ties favor local
    Newest,
    /// Always prefer the remote (the last writer the server observed wins)
    LastWins,
}

/// Strategy when a tracked file disappeared from the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalDeleteStrategy {
    /// Delete the local copy automatically, but only if it is unchanged
    /// since the last sync
    Auto,
    /// Ask the user before deleting
    #[default]
    Ask,
    /// Never delete local files
    Keep,
}

/// Encryption settings for a library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSettings {
    pub enabled: bool,
    /// User passphrase the content key is derived from
    pub passphrase: String,
    /// Per-profile random salt (base64), generated when the entry is saved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// Sync configuration for one library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryConfig {
    /// Local root directory of the library
    pub local_root: PathBuf,
    /// Whether sync is enabled for this library
    pub enabled: bool,
    /// Sync automatically when the application starts
    #[serde(default)]
    pub sync_on_startup: bool,
    /// Sync automatically when the application shuts down
    #[serde(default)]
    pub sync_on_shutdown: bool,
    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Wall-clock budget for a whole run; actions left over when it
    /// expires are deferred to the next sync
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub local_delete_strategy: LocalDeleteStrategy,
    /// Ask before propagating a local deletion to the remote
    #[serde(default = "default_true")]
    pub confirm_remote_delete: bool,
    /// Skip a run entirely when the local root looks unchanged and the
    /// last structural snapshot is younger than this many minutes.
    /// Zero disables the shortcut.
    #[serde(default)]
    pub smart_skip_minutes: u64,
    /// Clock-skew tolerance in seconds for remote mtime comparison
    /// (a minimum of one second always applies)
    #[serde(default)]
    pub clock_skew_secs: u64,
    /// WebDAV server URL (e.g. "https://cloud.example.com/remote.php/dav/files/user/")
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Remote path within the WebDAV server
    pub remote_path: String,
    /// Allow plaintext HTTP at all
    #[serde(default)]
    pub allow_insecure_http: bool,
    /// When non-empty, plaintext HTTP is only allowed for these hosts
    #[serde(default)]
    pub insecure_http_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionSettings>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

/// Credentials for WebDAV authentication
#[derive(Debug, Clone)]
pub struct SyncCredentials {
    pub username: String,
    pub password: String,
}

/// The persisted settings document: one entry per library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
}

/// Key-value settings store backed by a JSON document
pub struct SettingsStore {
    path: PathBuf,
    pub settings: SyncSettings,
}

impl SettingsStore {
    /// Load from file; a missing file yields empty settings
    pub fn load(path: &Path) -> Self {
        let settings = if path.exists() {
            std::fs::read_to_string(path)
                .ok()
                .and_then(|data| serde_json::from_str(&data).ok())
                .unwrap_or_default()
        } else {
            SyncSettings::default()
        };
        Self {
            path: path.to_path_buf(),
            settings,
        }
    }

    pub fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(&self.path, data)
    }

    /// Look up the configuration for a local root
    pub fn library_for(&self, local_root: &Path) -> Option<&LibraryConfig> {
        self.settings
            .libraries
            .iter()
            .find(|cfg| cfg.local_root == local_root)
    }

    /// Insert or replace the configuration for a local root. A missing
    /// encryption salt is generated here so the codec never has to invent
    /// one during decryption.
    pub fn upsert(&mut self, mut config: LibraryConfig) {
        if let Some(enc) = config.encryption.as_mut() {
            if enc.enabled && enc.salt.is_none() {
                enc.salt = Some(crate::codec::generate_salt());
            }
        }
        if let Some(existing) = self
            .settings
            .libraries
            .iter_mut()
            .find(|cfg| cfg.local_root == config.local_root)
        {
            *existing = config;
        } else {
            self.settings.libraries.push(config);
        }
    }
}

/// Reporting phase of a running sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Scan,
    Compare,
    Apply,
    Complete,
}

/// Progress event payload for a running sync
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Summary of one sync run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub renamed: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Actions abandoned because the run deadline expired; they are
    /// deferred to the next sync, not failures
    pub deferred: usize,
    /// The run was skipped entirely (structural hint unchanged)
    pub skipped: bool,
    /// Up to a handful of affected paths for the summary message
    pub sample_paths: Vec<String>,
    pub duration_ms: u64,
    /// Set when metadata persistence failed after an otherwise
    /// successful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How many affected paths the summary message lists
const SUMMARY_SAMPLE_LIMIT: usize = 5;

impl SyncReport {
    /// One-line human-readable summary of the run
    pub fn summary(&self) -> String {
        if self.skipped {
            return "sync skipped: library unchanged".to_string();
        }
        let mut line = format!(
            "{} uploaded, {} downloaded, {} renamed, {} deleted, {} conflicts, {} failed",
            self.uploaded, self.downloaded, self.renamed, self.deleted, self.conflicts, self.failed
        );
        if self.deferred > 0 {
            line.push_str(&format!(", {} deferred to next sync", self.deferred));
        }
        if !self.sample_paths.is_empty() {
            let shown: Vec<&str> = self
                .sample_paths
                .iter()
                .take(SUMMARY_SAMPLE_LIMIT)
                .map(String::as_str)
                .collect();
            line.push_str(&format!(" ({})", shown.join(", ")));
            if self.sample_paths.len() > SUMMARY_SAMPLE_LIMIT {
                line.push_str(", see the sync log for the full list");
            }
        }
        line
    }
}
