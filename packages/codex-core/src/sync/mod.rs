//! Sync planner (component E): scans two trees, diffs them by content
//! hash, applies directional and frontmatter-routing filters, and
//! produces (then, on request, executes) an idempotent plan.

pub mod frontmatter;
pub mod manifest;
pub mod pattern;
pub mod plan;
pub mod routing;

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::fs_util;

pub use manifest::SyncManifest;
pub use plan::{Direction, FileInfo, FileSyncStatus, Operation, PlanOptions, RoutingScanSummary, SyncPlan};

/// Build a [`SyncPlan`] for `direction` between `source_root` and
/// `target_root`. For `to-codex`, `source_root` is the project working
/// tree and `target_root` the codex tree (or vice versa for
/// `from-codex` — the routing scan always walks whichever root holds
/// the codex layout, which the caller passes as `codex_root`).
#[instrument(skip_all, fields(direction = ?direction))]
pub async fn build_plan(
    direction: Direction,
    source_root: &Path,
    target_root: &Path,
    codex_root: &Path,
    sync_config: &SyncConfig,
    manifest: &SyncManifest,
    options: &PlanOptions,
) -> Result<SyncPlan> {
    let source_files = plan::enumerate_tree(source_root).await?;
    let target_files = plan::enumerate_tree(target_root).await?;

    let (filtered_source, routing_summary) = match direction {
        Direction::ToCodex => (plan::filter_to_codex(&source_files, sync_config), None),
        Direction::FromCodex => {
            let codex_files = plan::enumerate_tree(codex_root).await?;
            let (kept, summary) = plan::routing_scan(codex_root, &codex_files, sync_config, options).await?;
            (kept, Some(summary))
        }
        Direction::Bidirectional => (plan::filter_to_codex(&source_files, sync_config), None),
    };

    let mut result = plan::diff(
        &filtered_source,
        &target_files,
        direction,
        options.delete_orphans,
        manifest,
        &sync_config.deletion_threshold,
    );
    result.source_root = source_root.to_path_buf();
    result.target_root = target_root.to_path_buf();
    result.routing_summary = routing_summary;

    info!(
        files = result.total_files,
        conflicts = result.conflicts.len(),
        requires_confirmation = result.requires_confirmation,
        "sync plan built"
    );

    Ok(result)
}

/// One file's outcome after executing a plan.
#[derive(Clone, Debug)]
pub struct AppliedFile {
    pub path: String,
    pub operation: Operation,
}

#[derive(Clone, Debug, Default)]
pub struct SyncResult {
    pub applied: Vec<AppliedFile>,
    pub failed: Vec<(String, String)>,
    pub bytes_written: u64,
}

/// Apply a plan. Idempotent: re-applying a fully-applied plan is a
/// no-op (creates/updates re-copy identical bytes, deletes hit an
/// already-missing path). On a per-file failure, execution continues
/// with the remaining files (at-least-once semantics) and the manifest
/// only records the files that actually succeeded.
///
/// `progress` is invoked after each file with its `FileSyncStatus`.
#[instrument(skip_all)]
pub async fn execute_plan(plan: &SyncPlan, manifest: &mut SyncManifest, now: i64, mut progress: impl FnMut(&FileSyncStatus)) -> Result<SyncResult> {
    let mut result = SyncResult::default();

    for status in &plan.statuses {
        match status.operation {
            Operation::Create | Operation::Update => {
                let source_path = plan.source_root.join(&status.path);
                let target_path = plan.target_root.join(&status.path);
                match fs_util::read_required(&source_path).await {
                    Ok(bytes) => match fs_util::write_atomic(&target_path, &bytes).await {
                        Ok(()) => {
                            result.bytes_written += bytes.len() as u64;
                            if let Some(hash) = &status.hash {
                                manifest.record_synced(status.path.clone(), hash.clone(), bytes.len() as u64, "sync", now);
                            }
                            result.applied.push(AppliedFile {
                                path: status.path.clone(),
                                operation: status.operation,
                            });
                        }
                        Err(e) => {
                            warn!(path = %status.path, error = %e, "failed to write synced file");
                            result.failed.push((status.path.clone(), e.to_string()));
                        }
                    },
                    Err(e) => {
                        warn!(path = %status.path, error = %e, "failed to read source file");
                        result.failed.push((status.path.clone(), e.to_string()));
                    }
                }
            }
            Operation::Delete => {
                let target_path = plan.target_root.join(&status.path);
                match fs_util::remove_file_if_exists(&target_path).await {
                    Ok(()) => {
                        manifest.record_deleted(&status.path);
                        result.applied.push(AppliedFile {
                            path: status.path.clone(),
                            operation: Operation::Delete,
                        });
                    }
                    Err(e) => {
                        warn!(path = %status.path, error = %e, "failed to delete synced file");
                        result.failed.push((status.path.clone(), e.to_string()));
                    }
                }
            }
            Operation::Skip | Operation::Conflict => {}
        }
        progress(status);
    }

    manifest.persist(now).await?;
    Ok(result)
}
