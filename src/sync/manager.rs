//! Sync orchestration.
//!
//! One `SyncManager` owns the run token for a data directory: a request
//! to start a sync while one is active returns [`SyncError::AlreadyRunning`]
//! instead of queueing. Run-level precondition failures (configuration,
//! security policy) abort before any side effect; per-action failures are
//! counted and never stop the run.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::codec::{CodecError, ContentCodec};

use super::backoff::Backoff;
use super::config::{LibraryConfig, SyncCredentials, SyncPhase, SyncProgress, SyncReport};
use super::executor::{execute_plan, ExecutorContext};
use super::hints;
use super::metadata::{LegacyMetadata, SyncMetadata};
use super::oplog::OpLog;
use super::profile::SyncProfile;
use super::prompt::SyncPrompter;
use super::reconcile::{reconcile, ReconcileOptions};
use super::remote::scan_remote;
use super::scanner::scan_local;
use super::webdav::{WebDAVClient, WebDAVError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("WebDAV error: {0}")]
    WebDAV(#[from] WebDAVError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sync not configured: {0}")]
    AuthOrConfig(String),
    #[error("security policy violation: {0}")]
    SecurityPolicy(String),
    #[error("failed to persist sync metadata: {0}")]
    MetadataPersist(String),
    #[error("a sync run is already in progress")]
    AlreadyRunning,
}

/// Progress callback for a running sync
pub type ProgressFn = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Manager for sync runs against one data directory
pub struct SyncManager {
    data_dir: PathBuf,
    run_lock: tokio::sync::Mutex<()>,
}

impl SyncManager {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Perform one full sync run for a library.
    ///
    /// Pipeline: preconditions, smart-skip probe, profile resolution,
    /// metadata load (with Safe-Pull activation), local + remote scans,
    /// reconciliation, batched execution under the run deadline, metadata
    /// and legacy persistence, hint refresh, summary.
    pub async fn sync_library(
        &self,
        config: &LibraryConfig,
        prompter: &dyn SyncPrompter,
        progress: Option<ProgressFn>,
    ) -> Result<SyncReport, SyncError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        let started = Instant::now();

        check_preconditions(config)?;
        let codec = build_codec(config)?;

        let oplog = OpLog::new(self.data_dir.join("sync.log"));
        let profile = SyncProfile::resolve(
            &self.data_dir,
            &config.local_root,
            &config.server_url,
            &config.remote_path,
        );
        log::info!(
            "Sync: starting run for {} (profile {})",
            config.local_root.display(),
            profile.id
        );

        if hints::should_skip(
            &profile.hint_path,
            &config.local_root,
            config.smart_skip_minutes,
        ) {
            log::info!(
                "Sync: structural hint unchanged for {}, skipping run",
                config.local_root.display()
            );
            oplog.append("run skipped: structural hint unchanged");
            return Ok(SyncReport {
                skipped: true,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        // Safe-Pull: the first run of a profile that inherits legacy
        // global metadata must not read its own empty record set as
        // "everything was deleted". The legacy records stand in as the
        // last-sync baseline and the reconciler never plans a delete.
        let safe_pull = profile.is_first_sync() && profile.legacy_exists();
        let mut metadata = SyncMetadata::load(&profile.metadata_path);
        if safe_pull {
            log::info!(
                "Sync: first sync for profile {} with legacy metadata present, Safe-Pull mode active",
                profile.id
            );
            oplog.append("safe-pull mode active for this run");
            metadata.files =
                LegacyMetadata::load(&profile.legacy_path).records_for(&config.remote_path);
        }

        let client = WebDAVClient::new(
            config.server_url.clone(),
            SyncCredentials {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            Duration::from_secs(config.timeout_secs),
        )?;
        let backoff = Backoff::default();

        emit(&progress, SyncPhase::Scan, 0, 0, "scanning library");
        let local = scan_local(&config.local_root, &metadata);
        let remote = scan_remote(&client, &config.remote_path, &backoff).await?;
        log::info!(
            "Sync: scanned {} local and {} remote documents",
            local.len(),
            remote.files.len()
        );

        emit(
            &progress,
            SyncPhase::Compare,
            0,
            local.len() + remote.files.len(),
            "comparing against last sync",
        );
        let opts = ReconcileOptions {
            safe_pull,
            local_delete_strategy: config.local_delete_strategy,
            confirm_remote_delete: config.confirm_remote_delete,
            clock_skew: chrono::Duration::seconds(config.clock_skew_secs as i64),
        };
        let plan = reconcile(&local, &remote.files, &metadata, &opts);
        log::info!("Sync: plan has {} actions", plan.len());
        for action in &plan {
            oplog.append(&format!("plan: {} ({})", action.path(), action.reason()));
        }

        emit(
            &progress,
            SyncPhase::Apply,
            0,
            plan.len(),
            "applying changes",
        );
        let deadline = started + Duration::from_secs(config.deadline_secs);
        let ctx = ExecutorContext {
            client: &client,
            backoff: &backoff,
            codec: codec.as_ref(),
            prompter,
            oplog: &oplog,
            local_root: &config.local_root,
            remote_root: &config.remote_path,
            conflict_strategy: config.conflict_strategy,
        };
        let total_actions = plan.len();
        let stats = execute_plan(&ctx, plan, &mut metadata, &local, &remote.files, deadline).await;

        // Record directory properties as hints and drop records for paths
        // gone from both sides
        metadata.dirs = remote.dirs;
        metadata
            .files
            .retain(|path, _| local.contains_key(path) || remote.files.contains_key(path));
        metadata.last_sync_time = Some(Utc::now());

        let mut report = SyncReport {
            uploaded: stats.uploaded,
            downloaded: stats.downloaded,
            renamed: stats.renamed,
            deleted: stats.deleted,
            conflicts: stats.conflicts,
            failed: stats.failed,
            deferred: stats.deferred,
            skipped: false,
            sample_paths: stats.applied_paths,
            duration_ms: started.elapsed().as_millis() as u64,
            error: None,
        };

        // Completed counts stand even when persistence fails; the failure
        // is surfaced as a distinct error on the report.
        if let Err(err) = metadata.save(&profile.metadata_path) {
            let persist_err = SyncError::MetadataPersist(err.to_string());
            log::error!("Sync: {}", persist_err);
            report.error = Some(persist_err.to_string());
        } else {
            let mut legacy = LegacyMetadata::load(&profile.legacy_path);
            legacy.merge_profile(&config.remote_path, &metadata.files);
            legacy.last_sync_time = metadata.last_sync_time;
            if let Err(err) = legacy.save(&profile.legacy_path) {
                log::warn!("Sync: failed to update legacy metadata: {}", err);
            }
        }

        if let Err(err) = hints::store(&profile.hint_path, hints::compute(&config.local_root)) {
            log::warn!("Sync: failed to refresh structural hint: {}", err);
        }

        let summary = report.summary();
        emit(
            &progress,
            SyncPhase::Complete,
            total_actions,
            total_actions,
            &summary,
        );
        log::info!("Sync: run complete — {}", summary);
        oplog.append(&format!("run complete: {}", summary));

        Ok(report)
    }
}

fn emit(
    progress: &Option<ProgressFn>,
    phase: SyncPhase,
    current: usize,
    total: usize,
    message: &str,
) {
    if let Some(callback) = progress {
        callback(SyncProgress {
            phase,
            current,
            total,
            message: message.to_string(),
        });
    }
}

/// Run-level checks that must pass before any side effect
fn check_preconditions(config: &LibraryConfig) -> Result<(), SyncError> {
    if !config.enabled {
        return Err(SyncError::AuthOrConfig(
            "sync is disabled for this library".to_string(),
        ));
    }
    if config.server_url.trim().is_empty() {
        return Err(SyncError::AuthOrConfig("server URL is not set".to_string()));
    }
    if config.username.is_empty() || config.password.is_empty() {
        return Err(SyncError::AuthOrConfig(
            "credentials are not set".to_string(),
        ));
    }

    if config.server_url.starts_with("http://") {
        if !config.allow_insecure_http {
            return Err(SyncError::SecurityPolicy(
                "plaintext HTTP is disabled".to_string(),
            ));
        }
        if !config.insecure_http_hosts.is_empty() {
            let host = reqwest::Url::parse(&config.server_url)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_default();
            if !config
                .insecure_http_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&host))
            {
                return Err(SyncError::SecurityPolicy(format!(
                    "host {host} is not on the plaintext HTTP allow-list"
                )));
            }
        }
    }

    Ok(())
}

fn build_codec(config: &LibraryConfig) -> Result<Option<ContentCodec>, SyncError> {
    match &config.encryption {
        Some(enc) if enc.enabled => {
            let salt = enc.salt.as_deref().ok_or_else(|| {
                SyncError::AuthOrConfig(
                    "encryption is enabled but no salt is stored".to_string(),
                )
            })?;
            Ok(Some(ContentCodec::new(&enc.passphrase, salt)?))
        }
        _ => Ok(None),
    }
}
