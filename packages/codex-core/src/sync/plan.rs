//! Tree enumeration and the five-step diff algorithm that produces a
//! [`SyncPlan`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;
use walkdir::WalkDir;

use crate::config::{DeletionThreshold, RoutingConfig, SyncConfig};
use crate::error::Result;
use crate::fs_util;
use crate::hash::ContentHash;

use super::frontmatter;
use super::manifest::SyncManifest;
use super::pattern::any_matches;
use super::routing;

const DEFAULT_SKIP_DIRS: [&str; 3] = ["node_modules", "dist", "build"];
const DEFAULT_MAX_FRONTMATTER_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Direction {
    ToCodex,
    FromCodex,
    Bidirectional,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Skip,
    Conflict,
}

/// One enumerated file, used only to compare trees.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub hash: ContentHash,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileSyncStatus {
    pub path: String,
    pub operation: Operation,
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub hash: Option<ContentHash>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RoutingScanSummary {
    pub scanned: usize,
    pub routed: usize,
    pub skipped_oversized: usize,
}

#[derive(Clone, Debug)]
pub struct SyncPlan {
    pub direction: Direction,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    pub statuses: Vec<FileSyncStatus>,
    pub total_files: usize,
    pub total_bytes: u64,
    pub conflicts: Vec<String>,
    pub skipped: Vec<String>,
    pub routing_summary: Option<RoutingScanSummary>,
    pub requires_confirmation: bool,
}

#[derive(Clone, Debug)]
pub struct PlanOptions {
    pub delete_orphans: bool,
    pub organization: String,
    pub target_project: String,
    pub codex_repo_name: String,
}

/// Walk `root`, skipping hidden directories and the default noise
/// directories (`node_modules`, `dist`, `build`), producing a `FileInfo`
/// per regular file.
#[instrument(skip_all, fields(root = %root.display()))]
pub async fn enumerate_tree(root: &Path) -> Result<Vec<FileInfo>> {
    let mut infos = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir() && DEFAULT_SKIP_DIRS.contains(&name.as_ref()) {
            return false;
        }
        true
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = entry.path().metadata().map_err(|e| crate::error::CodexError::io(entry.path(), e))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let hash = fs_util::hash_file(entry.path()).await?;

        infos.push(FileInfo {
            path: relative,
            size: metadata.len(),
            mtime,
            hash,
        });
    }

    Ok(infos)
}

/// Filter source files for a `to-codex` sync: keep paths matching some
/// `include` pattern and no `exclude` pattern.
pub fn filter_to_codex(files: &[FileInfo], sync_config: &SyncConfig) -> Vec<FileInfo> {
    files
        .iter()
        .filter(|f| any_matches(&sync_config.to_codex.include, &f.path) && !any_matches(&sync_config.to_codex.exclude, &f.path))
        .cloned()
        .collect()
}

/// The from-codex routing scan (step 3): walk the codex tree, parse
/// frontmatter on markdown/frontmatter-bearing files, and keep only
/// files routed to `target_project`.
#[instrument(skip_all, fields(target = %options.target_project))]
pub async fn routing_scan(
    codex_root: &Path,
    codex_files: &[FileInfo],
    sync_config: &SyncConfig,
    options: &PlanOptions,
) -> Result<(Vec<FileInfo>, RoutingScanSummary)> {
    let mut kept = Vec::new();
    let mut summary = RoutingScanSummary::default();

    for file in codex_files {
        if !(file.path.ends_with(".md") || file.path.ends_with(".mdx") || file.path.ends_with(".markdown")) {
            continue;
        }
        summary.scanned += 1;

        if file.size > DEFAULT_MAX_FRONTMATTER_FILE_SIZE {
            summary.skipped_oversized += 1;
            continue;
        }

        let source_project = routing::source_project(&file.path);
        let routing = &sync_config.routing;

        let directional_include = &sync_config.from_codex.include;
        let directional_exclude = &sync_config.from_codex.exclude;

        let metadata = if routing.use_frontmatter {
            let bytes = fs_util::read_required(&codex_root.join(&file.path)).await.unwrap_or_default();
            frontmatter::parse(&String::from_utf8_lossy(&bytes))
        } else {
            frontmatter::Metadata::default()
        };

        if routing::is_routed(
            &metadata,
            &file.path,
            source_project,
            &options.target_project,
            &options.organization,
            &options.codex_repo_name,
            routing,
            directional_include,
            directional_exclude,
        ) {
            summary.routed += 1;
            kept.push(file.clone());
        }
    }

    Ok((kept, summary))
}

/// Step 4 + 5: diff filtered source against target, then apply safety
/// thresholds on the resulting deletion count.
pub fn diff(
    source: &[FileInfo],
    target: &[FileInfo],
    direction: Direction,
    delete_orphans: bool,
    manifest: &SyncManifest,
    deletion_threshold: &DeletionThreshold,
) -> SyncPlan {
    let source_by_path: HashMap<&str, &FileInfo> = source.iter().map(|f| (f.path.as_str(), f)).collect();
    let target_by_path: HashMap<&str, &FileInfo> = target.iter().map(|f| (f.path.as_str(), f)).collect();

    let mut statuses = Vec::new();
    let mut conflicts = Vec::new();
    let mut skipped = Vec::new();
    let mut total_bytes = 0u64;

    for (path, file) in &source_by_path {
        match target_by_path.get(path) {
            None => {
                statuses.push(FileSyncStatus {
                    path: path.to_string(),
                    operation: Operation::Create,
                    size: Some(file.size),
                    mtime: Some(file.mtime),
                    hash: Some(file.hash.clone()),
                    reason: None,
                });
                total_bytes += file.size;
            }
            Some(target_file) if target_file.hash == file.hash => {
                statuses.push(FileSyncStatus {
                    path: path.to_string(),
                    operation: Operation::Skip,
                    size: Some(file.size),
                    mtime: Some(file.mtime),
                    hash: Some(file.hash.clone()),
                    reason: None,
                });
                skipped.push(path.to_string());
            }
            Some(_) => {
                let both_changed_since_manifest = direction == Direction::Bidirectional && manifest.changed_since(path, &file.hash);
                if both_changed_since_manifest {
                    statuses.push(FileSyncStatus {
                        path: path.to_string(),
                        operation: Operation::Conflict,
                        size: Some(file.size),
                        mtime: Some(file.mtime),
                        hash: Some(file.hash.clone()),
                        reason: Some("both sides changed since last sync".to_string()),
                    });
                    conflicts.push(path.to_string());
                } else {
                    statuses.push(FileSyncStatus {
                        path: path.to_string(),
                        operation: Operation::Update,
                        size: Some(file.size),
                        mtime: Some(file.mtime),
                        hash: Some(file.hash.clone()),
                        reason: None,
                    });
                    total_bytes += file.size;
                }
            }
        }
    }

    let mut deletion_count = 0usize;
    if delete_orphans {
        for (path, file) in &target_by_path {
            if !source_by_path.contains_key(path) {
                statuses.push(FileSyncStatus {
                    path: path.to_string(),
                    operation: Operation::Delete,
                    size: Some(file.size),
                    mtime: Some(file.mtime),
                    hash: Some(file.hash.clone()),
                    reason: None,
                });
                deletion_count += 1;
            }
        }
    }

    let percentage = if target.is_empty() {
        0.0
    } else {
        (deletion_count as f64 / target.len() as f64) * 100.0
    };
    let requires_confirmation = deletion_count > deletion_threshold.absolute || percentage > deletion_threshold.percentage;

    statuses.sort_by(|a, b| a.path.cmp(&b.path));

    SyncPlan {
        direction,
        source_root: PathBuf::new(),
        target_root: PathBuf::new(),
        total_files: statuses.len(),
        total_bytes,
        conflicts,
        skipped,
        routing_summary: None,
        requires_confirmation,
        statuses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncDirectionConfig;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn file(path: &str, content: &[u8]) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size: content.len() as u64,
            mtime: 0,
            hash: ContentHash::from_buffer(content),
        }
    }

    async fn empty_manifest() -> SyncManifest {
        let dir = tempfile::tempdir().unwrap();
        SyncManifest::open(dir.keep(), "acme", "docs").await.unwrap()
    }

    #[tokio::test]
    async fn diff_creates_missing_target_files() {
        let source = vec![file("a.md", b"content")];
        let target = vec![];
        let plan = diff(&source, &target, Direction::ToCodex, false, &empty_manifest().await, &DeletionThreshold::default());
        pretty_assert_eq!(plan.statuses.len(), 1);
        pretty_assert_eq!(plan.statuses[0].operation, Operation::Create);
    }

    #[tokio::test]
    async fn diff_skips_identical_content() {
        let source = vec![file("a.md", b"content")];
        let target = vec![file("a.md", b"content")];
        let plan = diff(&source, &target, Direction::ToCodex, false, &empty_manifest().await, &DeletionThreshold::default());
        pretty_assert_eq!(plan.statuses[0].operation, Operation::Skip);
        pretty_assert_eq!(plan.skipped, vec!["a.md".to_string()]);
    }

    #[tokio::test]
    async fn diff_updates_changed_content() {
        let source = vec![file("a.md", b"new")];
        let target = vec![file("a.md", b"old")];
        let plan = diff(&source, &target, Direction::ToCodex, false, &empty_manifest().await, &DeletionThreshold::default());
        pretty_assert_eq!(plan.statuses[0].operation, Operation::Update);
    }

    #[tokio::test]
    async fn diff_deletes_orphans_when_enabled() {
        let source = vec![];
        let target = vec![file("orphan.md", b"x")];
        let plan = diff(&source, &target, Direction::ToCodex, true, &empty_manifest().await, &DeletionThreshold::default());
        pretty_assert_eq!(plan.statuses[0].operation, Operation::Delete);
    }

    #[tokio::test]
    async fn diff_does_not_delete_when_disabled() {
        let source = vec![];
        let target = vec![file("orphan.md", b"x")];
        let plan = diff(&source, &target, Direction::ToCodex, false, &empty_manifest().await, &DeletionThreshold::default());
        assert!(plan.statuses.is_empty());
    }

    #[tokio::test]
    async fn diff_flags_conflict_when_bidirectional_and_manifest_stale() {
        let source = vec![file("a.md", b"source-version")];
        let target = vec![file("a.md", b"target-version")];
        let manifest = empty_manifest().await; // no prior record => "changed since" is true
        let plan = diff(&source, &target, Direction::Bidirectional, false, &manifest, &DeletionThreshold::default());
        pretty_assert_eq!(plan.statuses[0].operation, Operation::Conflict);
        pretty_assert_eq!(plan.conflicts, vec!["a.md".to_string()]);
    }

    #[tokio::test]
    async fn deletion_count_past_absolute_threshold_requires_confirmation() {
        let target: Vec<FileInfo> = (0..60).map(|i| file(&format!("f{i}.md"), b"x")).collect();
        let plan = diff(&[], &target, Direction::ToCodex, true, &empty_manifest().await, &DeletionThreshold::default());
        assert!(plan.requires_confirmation);
    }

    #[test]
    fn filter_to_codex_respects_include_and_exclude() {
        let files = vec![file("docs/a.md", b"a"), file("secrets/b.md", b"b")];
        let config = crate::config::SyncConfig {
            to_codex: SyncDirectionConfig {
                include: vec!["docs/**".to_string()],
                exclude: vec![],
            },
            ..Default::default()
        };
        let filtered = filter_to_codex(&files, &config);
        pretty_assert_eq!(filtered.len(), 1);
        pretty_assert_eq!(filtered[0].path, "docs/a.md");
    }
}
