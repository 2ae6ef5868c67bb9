//! Action plan execution.
//!
//! The plan is applied in concurrency-limited batches. Every transport
//! call goes through the retry decorator; per-action failures are logged
//! and counted without stopping the batch. A wall-clock deadline is
//! checked before each action starts; once exceeded, the remaining
//! actions are deferred to the next run, not failed. Prompts block only
//! the path that needs them, never the rest of the batch.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Instant;

use crate::codec::{CodecError, ContentCodec, RemoteBlob};

use super::backoff::{with_retry, Backoff};
use super::conflict::{self, Resolution};
use super::config::ConflictStrategy;
use super::hash::content_hash;
use super::manager::SyncError;
use super::metadata::{FileRecord, SyncMetadata};
use super::oplog::OpLog;
use super::prompt::{Confirmation, SyncPrompter};
use super::reconcile::Action;
use super::remote::remote_path_for;
use super::scanner::FileEntry;
use super::webdav::WebDAVClient;

/// Concurrent actions per batch
const BATCH_SIZE: usize = 10;

/// Everything one action needs to execute
pub struct ExecutorContext<'a> {
    pub client: &'a WebDAVClient,
    pub backoff: &'a Backoff,
    pub codec: Option<&'a ContentCodec>,
    pub prompter: &'a dyn SyncPrompter,
    pub oplog: &'a OpLog,
    pub local_root: &'a Path,
    pub remote_root: &'a str,
    pub conflict_strategy: ConflictStrategy,
}

/// Tallies from one execution pass
#[derive(Debug, Default)]
pub struct ExecStats {
    pub uploaded: usize,
    pub downloaded: usize,
    pub renamed: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub deferred: usize,
    pub applied_paths: Vec<String>,
}

/// What actually happened to one action
enum Applied {
    Uploaded { path: String, record: FileRecord },
    Downloaded { path: String, record: FileRecord },
    RemovedRemote { path: String },
    RemovedLocal { path: String },
    Moved { from: String, to: String, record: FileRecord },
    Skipped,
    Deferred,
}

/// Execute the plan, updating the in-memory metadata as actions succeed.
pub async fn execute_plan(
    ctx: &ExecutorContext<'_>,
    plan: Vec<Action>,
    metadata: &mut SyncMetadata,
    local: &HashMap<String, FileEntry>,
    remote: &HashMap<String, FileEntry>,
    deadline: Instant,
) -> ExecStats {
    let mut stats = ExecStats::default();
    if plan.is_empty() {
        return stats;
    }

    ensure_remote_parents(ctx, &plan).await;

    for batch in plan.chunks(BATCH_SIZE) {
        let outcomes = join_all(
            batch
                .iter()
                .map(|action| run_action(ctx, action, local, remote, deadline)),
        )
        .await;

        for (action, outcome) in batch.iter().zip(outcomes) {
            apply_outcome(ctx, action, outcome, metadata, &mut stats);
        }
    }

    if stats.deferred > 0 {
        log::info!(
            "Sync: deadline reached, {} actions deferred to the next run",
            stats.deferred
        );
        ctx.oplog
            .append(&format!("deadline reached, {} actions deferred", stats.deferred));
    }

    stats
}

/// Create the remote collections uploads and renames will write into.
async fn ensure_remote_parents(ctx: &ExecutorContext<'_>, plan: &[Action]) {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    let mut any_write = false;
    for action in plan {
        let target = match action {
            Action::Upload { path, .. }
            | Action::Conflict { path, .. }
            | Action::AskUpload { path } => Some(path),
            Action::MoveRemote { to, .. } => Some(to),
            _ => None,
        };
        if let Some(path) = target {
            any_write = true;
            if let Some((dir, _)) = path.rsplit_once('/') {
                dirs.insert(dir.to_string());
            }
        }
    }
    if !any_write {
        return;
    }
    let _ = ctx.client.mkdir_p(ctx.remote_root).await;
    for dir in dirs {
        let _ = ctx
            .client
            .mkdir_p(&remote_path_for(ctx.remote_root, &dir))
            .await;
    }
}

async fn run_action(
    ctx: &ExecutorContext<'_>,
    action: &Action,
    local: &HashMap<String, FileEntry>,
    remote: &HashMap<String, FileEntry>,
    deadline: Instant,
) -> Result<Applied, SyncError> {
    if Instant::now() >= deadline {
        return Ok(Applied::Deferred);
    }

    match action {
        Action::Upload { path, .. } => {
            let if_match = remote.get(path).and_then(|e| e.etag.as_deref());
            let record = do_upload(ctx, path, if_match).await?;
            Ok(Applied::Uploaded {
                path: path.clone(),
                record,
            })
        }

        Action::Download { path, .. } => {
            let record = do_download(ctx, path, remote).await?;
            Ok(Applied::Downloaded {
                path: path.clone(),
                record,
            })
        }

        Action::Delete { path, .. } => {
            do_delete_remote(ctx, path).await?;
            Ok(Applied::RemovedRemote { path: path.clone() })
        }

        Action::DeleteLocal { path, .. } => {
            tokio::fs::remove_file(ctx.local_root.join(path)).await?;
            Ok(Applied::RemovedLocal { path: path.clone() })
        }

        Action::MoveRemote { from, to } => {
            let record = do_move_remote(ctx, from, to, local).await?;
            Ok(Applied::Moved {
                from: from.clone(),
                to: to.clone(),
                record,
            })
        }

        Action::Conflict { path, .. } => {
            let local_mtime = local.get(path).and_then(|e| e.mtime);
            let remote_mtime = remote.get(path).and_then(|e| e.mtime);
            let resolution = conflict::resolve(
                ctx.conflict_strategy,
                ctx.prompter,
                path,
                local_mtime,
                remote_mtime,
            )
            .await;
            match resolution {
                Resolution::UploadLocal => {
                    let if_match = remote.get(path).and_then(|e| e.etag.as_deref());
                    let record = do_upload(ctx, path, if_match).await?;
                    Ok(Applied::Uploaded {
                        path: path.clone(),
                        record,
                    })
                }
                Resolution::DownloadRemote => {
                    let record = do_download(ctx, path, remote).await?;
                    Ok(Applied::Downloaded {
                        path: path.clone(),
                        record,
                    })
                }
                Resolution::Skip => Ok(Applied::Skipped),
            }
        }

        Action::AskUpload { path } => match ctx.prompter.ask_upload_new(path).await {
            Confirmation::Confirm => {
                let record = do_upload(ctx, path, None).await?;
                Ok(Applied::Uploaded {
                    path: path.clone(),
                    record,
                })
            }
            Confirmation::Cancel => Ok(Applied::Skipped),
        },

        Action::AskRemoteDeleted { path } => match ctx.prompter.ask_remote_deleted(path).await {
            Confirmation::Confirm => {
                tokio::fs::remove_file(ctx.local_root.join(path)).await?;
                Ok(Applied::RemovedLocal { path: path.clone() })
            }
            Confirmation::Cancel => Ok(Applied::Skipped),
        },

        Action::AskLocalDeleted { path } => match ctx.prompter.ask_local_deleted(path).await {
            Confirmation::Confirm => {
                do_delete_remote(ctx, path).await?;
                Ok(Applied::RemovedRemote { path: path.clone() })
            }
            Confirmation::Cancel => {
                // The user chose to keep the file: restore it
                let record = do_download(ctx, path, remote).await?;
                Ok(Applied::Downloaded {
                    path: path.clone(),
                    record,
                })
            }
        },
    }
}

fn apply_outcome(
    ctx: &ExecutorContext<'_>,
    action: &Action,
    outcome: Result<Applied, SyncError>,
    metadata: &mut SyncMetadata,
    stats: &mut ExecStats,
) {
    let was_conflict = matches!(action, Action::Conflict { .. });
    let is_deferred = matches!(&outcome, Ok(Applied::Deferred));
    if was_conflict && !is_deferred {
        stats.conflicts += 1;
    }

    match outcome {
        Ok(Applied::Uploaded { path, record }) => {
            ctx.oplog
                .append(&format!("upload {} ({})", path, action.reason()));
            metadata.files.insert(path.clone(), record);
            stats.uploaded += 1;
            stats.applied_paths.push(path);
        }
        Ok(Applied::Downloaded { path, record }) => {
            ctx.oplog
                .append(&format!("download {} ({})", path, action.reason()));
            metadata.files.insert(path.clone(), record);
            stats.downloaded += 1;
            stats.applied_paths.push(path);
        }
        Ok(Applied::RemovedRemote { path }) => {
            ctx.oplog
                .append(&format!("delete remote {} ({})", path, action.reason()));
            metadata.files.remove(&path);
            stats.deleted += 1;
            stats.applied_paths.push(path);
        }
        Ok(Applied::RemovedLocal { path }) => {
            ctx.oplog
                .append(&format!("delete local {} ({})", path, action.reason()));
            metadata.files.remove(&path);
            stats.deleted += 1;
            stats.applied_paths.push(path);
        }
        Ok(Applied::Moved { from, to, record }) => {
            ctx.oplog.append(&format!("rename {} -> {}", from, to));
            metadata.files.remove(&from);
            metadata.files.insert(to.clone(), record);
            stats.renamed += 1;
            stats.applied_paths.push(to);
        }
        Ok(Applied::Skipped) => {
            ctx.oplog
                .append(&format!("skipped {} ({})", action.path(), action.reason()));
        }
        Ok(Applied::Deferred) => {
            stats.deferred += 1;
        }
        Err(err) => {
            log::error!("Sync: {} failed for {}: {}", action.reason(), action.path(), err);
            ctx.oplog
                .append(&format!("failed {} ({}): {}", action.path(), action.reason(), err));
            stats.failed += 1;
        }
    }
}

async fn do_upload(
    ctx: &ExecutorContext<'_>,
    path: &str,
    if_match: Option<&str>,
) -> Result<FileRecord, SyncError> {
    let abs = ctx.local_root.join(path);
    let bytes = tokio::fs::read(&abs).await?;
    let meta = tokio::fs::metadata(&abs).await?;
    let hash = content_hash(&bytes);

    let body = match ctx.codec {
        Some(codec) => codec.encrypt(&bytes)?,
        None => bytes,
    };

    let remote_path = remote_path_for(ctx.remote_root, path);
    let put = with_retry(ctx.backoff, "upload", || {
        ctx.client.put(&remote_path, &body, if_match)
    })
    .await?;

    // Some servers omit the ETag on PUT; probe for it so the next run has
    // change-detection evidence.
    let (remote_etag, remote_mtime) = match put.etag {
        Some(etag) => (Some(etag), None),
        None => probe_remote_state(ctx, &remote_path).await,
    };

    Ok(FileRecord {
        hash,
        local_mtime: meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
        size: meta.len(),
        sync_time: Utc::now(),
        remote_mtime,
        remote_etag,
    })
}

async fn do_download(
    ctx: &ExecutorContext<'_>,
    path: &str,
    remote: &HashMap<String, FileEntry>,
) -> Result<FileRecord, SyncError> {
    let remote_path = remote_path_for(ctx.remote_root, path);
    let (bytes, etag) = with_retry(ctx.backoff, "download", || ctx.client.get(&remote_path)).await?;

    let blob = RemoteBlob::sniff(&bytes)?;
    let plain = match (blob, ctx.codec) {
        (RemoteBlob::Plain(data), _) => data,
        (blob @ RemoteBlob::Encrypted { .. }, Some(codec)) => codec.decrypt(blob)?,
        (RemoteBlob::Encrypted { .. }, None) => {
            return Err(SyncError::Codec(CodecError::NotConfigured));
        }
    };

    let abs = ctx.local_root.join(path);
    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&abs, &plain).await?;
    let meta = tokio::fs::metadata(&abs).await?;

    let remote_entry = remote.get(path);
    Ok(FileRecord {
        hash: content_hash(&plain),
        local_mtime: meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
        size: meta.len(),
        sync_time: Utc::now(),
        remote_mtime: remote_entry.and_then(|e| e.mtime),
        remote_etag: etag.or_else(|| remote_entry.and_then(|e| e.etag.clone())),
    })
}

async fn do_delete_remote(ctx: &ExecutorContext<'_>, path: &str) -> Result<(), SyncError> {
    let remote_path = remote_path_for(ctx.remote_root, path);
    with_retry(ctx.backoff, "delete", || ctx.client.delete(&remote_path)).await?;
    Ok(())
}

async fn do_move_remote(
    ctx: &ExecutorContext<'_>,
    from: &str,
    to: &str,
    local: &HashMap<String, FileEntry>,
) -> Result<FileRecord, SyncError> {
    let from_remote = remote_path_for(ctx.remote_root, from);
    let to_remote = remote_path_for(ctx.remote_root, to);
    with_retry(ctx.backoff, "move", || {
        ctx.client.move_to(&from_remote, &to_remote)
    })
    .await?;

    // The destination gets a fresh ETag on most servers; capture it
    let (remote_etag, remote_mtime) = probe_remote_state(ctx, &to_remote).await;

    let entry = local.get(to);
    Ok(FileRecord {
        hash: entry
            .and_then(|e| e.hash.clone())
            .unwrap_or_default(),
        local_mtime: entry
            .and_then(|e| e.mtime)
            .unwrap_or_else(Utc::now),
        size: entry.map(|e| e.size).unwrap_or(0),
        sync_time: Utc::now(),
        remote_mtime,
        remote_etag,
    })
}

/// Best-effort HEAD after a write, for servers that omit response ETags
async fn probe_remote_state(
    ctx: &ExecutorContext<'_>,
    remote_path: &str,
) -> (Option<String>, Option<DateTime<Utc>>) {
    match ctx.client.head(remote_path).await {
        Ok(head) => (head.etag, head.last_modified),
        Err(err) => {
            log::debug!("Sync: post-write probe of {} failed: {}", remote_path, err);
            (None, None)
        }
    }
}
