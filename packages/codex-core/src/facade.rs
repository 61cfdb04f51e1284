//! Client facade (component F): the single entry point adapters (CLI,
//! MCP server, library consumers) are expected to drive. Wraps the
//! storage manager and cache engine behind the operations spec.md §5
//! names, and owns the sync planner's root-path plumbing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_regex::Regex;
use tracing::{instrument, warn};

use crate::cache::{CacheEngine, CacheStats, GetOptions, GetOutcome, ListOptions, ListedEntry};
use crate::config::Config;
use crate::error::Result;
use crate::manager::StorageManager;
use crate::reference::{Reference, ResolutionContext, ResolvedReference};
use crate::sync::{self, Direction, PlanOptions, SyncManifest, SyncPlan, SyncResult};

/// Per-call overrides for [`Facade::fetch`]; `None` fields fall back to
/// configuration defaults.
#[derive(Clone, Debug, Default)]
pub struct FetchRequest {
    pub bypass_cache: bool,
    pub ttl: Option<u64>,
    pub branch: Option<String>,
}

/// Coarse health signal for the CLI/MCP `health` command: whether every
/// configured provider is at least reachable, independent of whether it
/// currently holds any given reference.
#[derive(Clone, Debug)]
pub struct Health {
    pub offline_mode: bool,
    pub providers: Vec<String>,
    pub cache_entry_count: usize,
}

/// Where a sync plan/execute should read and write. The facade has no
/// opinion on where a codex working tree lives on disk; the adapter
/// supplies it explicitly.
#[derive(Clone, Debug)]
pub struct SyncRoots {
    pub project_root: PathBuf,
    pub codex_root: PathBuf,
}

pub struct Facade {
    config: Config,
    project_root: PathBuf,
    storage: Arc<StorageManager>,
    cache: Arc<CacheEngine>,
}

impl Facade {
    pub async fn new(config: Config, project_root: impl Into<PathBuf>, storage: StorageManager) -> Result<Self> {
        let project_root = project_root.into();
        let cache_root = config.cache_dir_path(&project_root);
        let cache = CacheEngine::open(cache_root, &config.cache).await?;
        Ok(Self {
            config,
            project_root,
            storage: Arc::new(storage),
            cache: Arc::new(cache),
        })
    }

    fn resolution_context(&self) -> ResolutionContext {
        ResolutionContext {
            current_organization: Some(self.config.organization.clone()).filter(|s| !s.is_empty()),
            current_project: Some(self.config.project.clone()).filter(|s| !s.is_empty()),
            cache_root: self.config.cache_dir_path(&self.project_root),
        }
    }

    /// Fetch-through a `codex://` URI, per spec.md §4.D/§5. Schedules a
    /// background revalidation when the hit is stale, per the
    /// stale-while-revalidate contract.
    #[instrument(skip(self))]
    pub async fn fetch(&self, uri: &str, request: &FetchRequest, now: i64) -> Result<GetOutcome> {
        let reference = Reference::parse(uri)?;
        let ctx = self.resolution_context();
        let resolved = ResolvedReference::resolve(reference, &ctx, Some(&self.config));
        let fetch_options = StorageManager::resolve_options(&self.config, request.branch.clone());
        let options = GetOptions {
            bypass_cache: request.bypass_cache,
            ttl_override: request.ttl,
            allow_stale: false,
        };

        let outcome = self.cache.get(&resolved, &self.storage, &fetch_options, &options, now).await?;

        if outcome.needs_revalidation {
            let cache = Arc::clone(&self.cache);
            let storage = Arc::clone(&self.storage);
            let ttl = request.ttl.unwrap_or(self.config.cache.default_ttl);
            tokio::spawn(async move {
                cache.revalidate(&resolved, &storage, &fetch_options, ttl, now).await;
            });
        }

        Ok(outcome)
    }

    /// Invalidate a single pattern, or every entry if `pattern` is `None`.
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, pattern: Option<&str>) -> Result<usize> {
        match pattern {
            None => {
                let count = self.cache.stats(0).await.entry_count;
                self.cache.clear().await?;
                Ok(count)
            }
            Some(pattern) => {
                let regex = Regex::new(pattern).map_err(|e| crate::error::CodexError::config(format!("invalid invalidation pattern `{pattern}`: {e}")))?;
                self.cache.invalidate_pattern(&regex).await
            }
        }
    }

    pub async fn stats(&self, now: i64) -> CacheStats {
        self.cache.stats(now).await
    }

    pub async fn list_entries(&self, options: &ListOptions, now: i64) -> Vec<ListedEntry> {
        self.cache.list_entries(options, now).await
    }

    /// Build a sync plan. `target_root` is the tree being synced *into*:
    /// the codex tree for `to-codex`, the project tree for `from-codex`.
    /// The manifest lives at `target_root`, keyed by `(organization,
    /// project)`.
    #[instrument(skip(self, roots))]
    pub async fn plan(&self, direction: Direction, roots: &SyncRoots, delete_orphans: bool) -> Result<SyncPlan> {
        let (source_root, target_root) = match direction {
            Direction::ToCodex => (self.project_root.as_path(), roots.codex_root.as_path()),
            Direction::FromCodex | Direction::Bidirectional => (roots.codex_root.as_path(), self.project_root.as_path()),
        };

        let manifest = SyncManifest::open(target_root, &self.config.organization, &self.config.project).await?;
        let options = PlanOptions {
            delete_orphans,
            organization: self.config.organization.clone(),
            target_project: self.config.project.clone(),
            codex_repo_name: "codex".to_string(),
        };

        sync::build_plan(direction, source_root, target_root, &roots.codex_root, &self.config.sync, &manifest, &options).await
    }

    /// Execute a previously built plan, persisting the manifest at its
    /// `target_root` afterward.
    #[instrument(skip(self, plan))]
    pub async fn execute(&self, plan: &SyncPlan, now: i64, progress: impl FnMut(&sync::FileSyncStatus)) -> Result<SyncResult> {
        let mut manifest = SyncManifest::open(&plan.target_root, &self.config.organization, &self.config.project).await?;
        sync::execute_plan(plan, &mut manifest, now, progress).await
    }

    pub async fn health(&self, now: i64) -> Health {
        Health {
            offline_mode: self.config.cache.offline_mode,
            providers: self.config.storage.iter().map(|p| p.provider_type.clone()).collect(),
            cache_entry_count: self.cache.stats(now).await.entry_count,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}
