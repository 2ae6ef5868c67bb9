//! Change detection and action planning.
//!
//! Given the local index, the remote index, and the last-sync metadata,
//! produce the ordered list of per-path actions for one run. Rename
//! detection happens before per-path classification; a dedicated
//! Safe-Pull mode handles the first sync of a profile that inherits
//! legacy global metadata, where an empty per-profile record set must not
//! be read as "everything was deleted".

use chrono::Duration;
use std::collections::{BTreeSet, HashMap};

use super::config::LocalDeleteStrategy;
use super::metadata::{FileRecord, SyncMetadata};
use super::scanner::FileEntry;

/// One planned operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Upload { path: String, reason: &'static str },
    Download { path: String, reason: &'static str },
    /// Delete the remote copy
    Delete { path: String, reason: &'static str },
    /// Delete the local copy
    DeleteLocal { path: String, reason: &'static str },
    /// Both sides changed; route through the conflict resolver
    Conflict { path: String, reason: &'static str },
    /// Rename the remote copy instead of upload + delete
    MoveRemote { from: String, to: String },
    /// The local copy vanished while a sync record exists
    AskLocalDeleted { path: String },
    /// The remote copy vanished while a sync record exists
    AskRemoteDeleted { path: String },
    /// A local file the remote has never seen (Safe-Pull): confirm upload
    AskUpload { path: String },
}

impl Action {
    /// Primary affected path (the destination for renames)
    pub fn path(&self) -> &str {
        match self {
            Action::Upload { path, .. }
            | Action::Download { path, .. }
            | Action::Delete { path, .. }
            | Action::DeleteLocal { path, .. }
            | Action::Conflict { path, .. }
            | Action::AskLocalDeleted { path }
            | Action::AskRemoteDeleted { path }
            | Action::AskUpload { path } => path,
            Action::MoveRemote { to, .. } => to,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Action::Upload { reason, .. }
            | Action::Download { reason, .. }
            | Action::Delete { reason, .. }
            | Action::DeleteLocal { reason, .. }
            | Action::Conflict { reason, .. } => reason,
            Action::MoveRemote { .. } => "renamed",
            Action::AskLocalDeleted { .. } => "local-deleted",
            Action::AskRemoteDeleted { .. } => "remote-deleted",
            Action::AskUpload { .. } => "safe-pull",
        }
    }
}

/// Options for one reconciliation pass
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// First sync of this profile while legacy metadata exists
    pub safe_pull: bool,
    pub local_delete_strategy: LocalDeleteStrategy,
    /// Ask before propagating a local deletion to the remote; when false
    /// the deletion propagates without a prompt
    pub confirm_remote_delete: bool,
    /// Configured clock-skew tolerance; a minimum of one second always
    /// applies to remote mtime comparison
    pub clock_skew: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            safe_pull: false,
            local_delete_strategy: LocalDeleteStrategy::default(),
            confirm_remote_delete: true,
            clock_skew: Duration::zero(),
        }
    }
}

/// Whether the remote side changed relative to the last-sync record.
/// Prefers etag comparison, falls back to mtime with skew tolerance, and
/// returns `None` when neither form of evidence is available; the caller
/// must never treat that as "unchanged".
fn remote_changed(entry: &FileEntry, record: &FileRecord, skew: Duration) -> Option<bool> {
    if let (Some(etag), Some(last_etag)) = (&entry.etag, &record.remote_etag) {
        return Some(etag != last_etag);
    }
    if let (Some(mtime), Some(last_mtime)) = (entry.mtime, record.remote_mtime) {
        let tolerance = skew.num_seconds().max(1);
        return Some((mtime - last_mtime).num_seconds().abs() > tolerance);
    }
    None
}

fn local_changed(entry: &FileEntry, record: &FileRecord) -> bool {
    entry.hash.as_deref() != Some(record.hash.as_str())
}

/// Produce the action plan for one sync run.
///
/// Running this twice with no intervening change on either side yields an
/// empty plan the second time.
pub fn reconcile(
    local: &HashMap<String, FileEntry>,
    remote: &HashMap<String, FileEntry>,
    last: &SyncMetadata,
    opts: &ReconcileOptions,
) -> Vec<Action> {
    let mut moves = Vec::new();
    let mut actions = Vec::new();
    let mut consumed: BTreeSet<String> = BTreeSet::new();

    // Rename detection: a local-only path whose content hash matches a
    // last-sync record whose path is remote-only means the file moved
    // locally; mirror the move on the remote instead of upload + delete.
    let local_only: BTreeSet<&String> =
        local.keys().filter(|p| !remote.contains_key(*p)).collect();
    let remote_only: BTreeSet<&String> =
        remote.keys().filter(|p| !local.contains_key(*p)).collect();

    let mut paired: BTreeSet<&String> = BTreeSet::new();
    for new_path in &local_only {
        let Some(hash) = local[*new_path].hash.as_deref() else {
            continue;
        };
        let candidate = remote_only.iter().find(|old| {
            !paired.contains(**old)
                && last
                    .files
                    .get(**old)
                    .map(|record| record.hash == hash)
                    .unwrap_or(false)
        });
        if let Some(old_path) = candidate {
            moves.push(Action::MoveRemote {
                from: (*old_path).clone(),
                to: (*new_path).clone(),
            });
            paired.insert(*old_path);
            consumed.insert((*old_path).clone());
            consumed.insert((*new_path).clone());
        }
    }

    // Union of every path either side or the metadata knows about
    let mut paths: BTreeSet<&String> = BTreeSet::new();
    paths.extend(local.keys());
    paths.extend(remote.keys());
    paths.extend(last.files.keys());

    for path in paths {
        if consumed.contains(path) {
            continue;
        }
        let l = local.get(path);
        let r = remote.get(path);
        let record = last.files.get(path);

        match (l, r, record) {
            // Local only, never synced
            (Some(_), None, None) => {
                if opts.safe_pull {
                    actions.push(Action::AskUpload { path: path.clone() });
                } else {
                    actions.push(Action::Upload {
                        path: path.clone(),
                        reason: "local-new",
                    });
                }
            }

            // Local present, remote gone, record exists: remote deletion
            (Some(entry), None, Some(record)) => {
                if opts.safe_pull {
                    actions.push(Action::AskUpload { path: path.clone() });
                } else {
                    match opts.local_delete_strategy {
                        LocalDeleteStrategy::Auto => {
                            if !local_changed(entry, record) {
                                actions.push(Action::DeleteLocal {
                                    path: path.clone(),
                                    reason: "remote-deleted",
                                });
                            } else {
                                log::warn!(
                                    "Reconcile: {} was deleted remotely but changed locally, keeping it",
                                    path
                                );
                            }
                        }
                        LocalDeleteStrategy::Ask => {
                            actions.push(Action::AskRemoteDeleted { path: path.clone() });
                        }
                        LocalDeleteStrategy::Keep => {}
                    }
                }
            }

            // Remote only, never synced
            (None, Some(_), None) => {
                actions.push(Action::Download {
                    path: path.clone(),
                    reason: "remote-new",
                });
            }

            // Remote present, local gone, record exists: local deletion
            (None, Some(_), Some(_)) => {
                if opts.safe_pull {
                    actions.push(Action::Download {
                        path: path.clone(),
                        reason: "safe-pull",
                    });
                } else if opts.confirm_remote_delete {
                    actions.push(Action::AskLocalDeleted { path: path.clone() });
                } else {
                    actions.push(Action::Delete {
                        path: path.clone(),
                        reason: "local-deleted",
                    });
                }
            }

            // Both present, never synced through this profile
            (Some(_), Some(_), None) => {
                if opts.safe_pull {
                    // Ambiguous: no record to compare against, do nothing
                } else {
                    actions.push(Action::Conflict {
                        path: path.clone(),
                        reason: "first-sync",
                    });
                }
            }

            // Both present with a record: ordinary three-way comparison
            (Some(le), Some(re), Some(record)) => {
                let local_changed = local_changed(le, record);
                let remote_changed = remote_changed(re, record, opts.clock_skew);

                if opts.safe_pull {
                    match (local_changed, remote_changed) {
                        (true, Some(false)) => actions.push(Action::Upload {
                            path: path.clone(),
                            reason: "local-modified",
                        }),
                        (false, Some(true)) => actions.push(Action::Download {
                            path: path.clone(),
                            reason: "remote-modified",
                        }),
                        (false, Some(false)) => {}
                        // Two-sided change or missing remote evidence:
                        // ask the user to pick a side
                        _ => actions.push(Action::Conflict {
                            path: path.clone(),
                            reason: "safe-pull",
                        }),
                    }
                } else {
                    match (local_changed, remote_changed) {
                        (false, Some(false)) => {}
                        (true, Some(false)) => actions.push(Action::Upload {
                            path: path.clone(),
                            reason: "local-modified",
                        }),
                        (false, Some(true)) => actions.push(Action::Download {
                            path: path.clone(),
                            reason: "remote-modified",
                        }),
                        (true, Some(true)) => actions.push(Action::Conflict {
                            path: path.clone(),
                            reason: "both-modified",
                        }),
                        // No remote change evidence at all: never assume
                        // unchanged
                        (_, None) => actions.push(Action::Conflict {
                            path: path.clone(),
                            reason: "remote-unknown",
                        }),
                    }
                }
            }

            // Gone on both sides: the stale record is pruned after the run
            (None, None, Some(_)) => {}
            (None, None, None) => unreachable!("path came from one of the three maps"),
        }
    }

    moves.extend(actions);
    moves
}
