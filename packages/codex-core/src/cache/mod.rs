//! Cache engine (component D): a two-tier (memory + on-disk) content
//! cache with TTL, stale-while-revalidate, LRU eviction, single-flight
//! coalescing, and atomic persistence.

pub mod entry;
pub mod index;
pub mod memory;
pub mod singleflight;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use derive_more::Debug;
use futures::FutureExt;
use tracing::{instrument, warn};

use crate::config::CacheConfig;
use crate::error::{CodexError, Result};
use crate::manager::StorageManager;
use crate::provider::FetchOptions;
use crate::reference::{ResolvedReference, SourceType};

pub use entry::{CacheEntry, CacheStatus};
use entry::format_epoch_seconds;
pub use index::CacheIndex;
pub use memory::MemoryTier;
pub use singleflight::SingleFlight;

/// What a `get` returned: content plus provenance.
///
/// `needs_revalidation` is set on a stale hit; the caller decides whether
/// to kick off a background `revalidate` (typically via `tokio::spawn`
/// against a cloned `Arc<CacheEngine>`/`Arc<StorageManager>`), since the
/// engine itself holds no runtime handle of its own.
#[derive(Clone, Debug)]
pub struct GetOutcome {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub from_cache: bool,
    pub source: String,
    pub needs_revalidation: bool,
}

/// Aggregate statistics over the on-disk index.
#[derive(Clone, Debug, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub fresh: usize,
    pub stale: usize,
    pub expired: usize,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum SortBy {
    #[default]
    Uri,
    Size,
    CreatedAt,
    ExpiresAt,
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub status: Option<CacheStatus>,
    pub sort_by: SortBy,
    pub descending: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Clone, Debug)]
pub struct ListedEntry {
    pub uri: String,
    pub size: u64,
    pub content_type: Option<String>,
    #[debug("{}", format_epoch_seconds(*created_at))]
    pub created_at: i64,
    #[debug("{}", format_epoch_seconds(*expires_at))]
    pub expires_at: i64,
    pub status: CacheStatus,
    pub source: String,
}

/// Options accepted by a `get` call.
#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    pub bypass_cache: bool,
    pub ttl_override: Option<u64>,
    pub allow_stale: bool,
}

pub struct CacheEngine {
    memory: Mutex<MemoryTier>,
    index: tokio::sync::RwLock<CacheIndex>,
    single_flight: SingleFlight,
    revalidating: Mutex<HashSet<String>>,
    default_ttl: u64,
    stale_window: u64,
    fallback_to_stale: bool,
    offline_mode: bool,
}

impl CacheEngine {
    pub async fn open(cache_root: impl Into<std::path::PathBuf>, config: &CacheConfig) -> Result<Self> {
        let index = CacheIndex::open(cache_root).await?;
        Ok(Self {
            memory: Mutex::new(MemoryTier::new(config.max_memory_entries, config.max_memory_size)),
            index: tokio::sync::RwLock::new(index),
            single_flight: SingleFlight::new(),
            revalidating: Mutex::new(HashSet::new()),
            default_ttl: config.default_ttl,
            stale_window: config.stale_window,
            fallback_to_stale: config.fallback_to_stale,
            offline_mode: config.offline_mode,
        })
    }

    /// Fetch-through `get`, per spec.md §4.D. `now` is injected by the
    /// caller (Unix epoch seconds) so the engine stays clock-agnostic and
    /// trivially testable.
    #[instrument(skip_all, fields(uri = resolved.reference.original_uri()))]
    pub async fn get(
        &self,
        resolved: &ResolvedReference,
        storage: &Arc<StorageManager>,
        fetch_options: &FetchOptions,
        options: &GetOptions,
        now: i64,
    ) -> Result<GetOutcome> {
        let uri = resolved.reference.original_uri().to_string();

        // Step 1: current-project file-plugin references bypass the cache
        // entirely, for read-your-writes semantics on working-tree edits.
        if resolved.is_current_project && resolved.source_type == Some(SourceType::FilePlugin) {
            let result = storage.fetch(resolved, fetch_options).await?;
            return Ok(GetOutcome {
                content: result.content,
                content_type: result.content_type,
                from_cache: false,
                source: result.source,
                needs_revalidation: false,
            });
        }

        if !options.bypass_cache {
            if let Some(outcome) = self.try_cache_hit(&uri, options, now).await? {
                return Ok(outcome);
            }
        }

        if self.offline_mode {
            return Err(CodexError::NotFound {
                uri,
                providers: vec!["offline".to_string()],
            });
        }

        self.fetch_and_store(&uri, resolved, storage, fetch_options, options, now).await
    }

    /// Look up the URI in memory, then disk, promoting disk hits into
    /// memory. Returns `None` on a full miss.
    async fn try_cache_hit(&self, uri: &str, options: &GetOptions, now: i64) -> Result<Option<GetOutcome>> {
        {
            let mut memory = self.memory.lock().expect("memory tier mutex poisoned");
            if let Some(entry) = memory.get_mut(uri) {
                let status = entry.status(now, self.stale_window);
                if status != CacheStatus::Expired || options.allow_stale {
                    entry.touch(now);
                    return Ok(Some(GetOutcome {
                        content: entry.content.clone(),
                        content_type: entry.content_type.clone(),
                        from_cache: true,
                        source: entry.source.clone(),
                        needs_revalidation: status == CacheStatus::Stale,
                    }));
                }
            }
        }

        let mut index = self.index.write().await;
        if let Some(entry) = index.get(uri).await? {
            let status = entry.status(now, self.stale_window);
            if status == CacheStatus::Expired && !options.allow_stale {
                return Ok(None);
            }
            let outcome = GetOutcome {
                content: entry.content.clone(),
                content_type: entry.content_type.clone(),
                from_cache: true,
                source: entry.source.clone(),
                needs_revalidation: status == CacheStatus::Stale,
            };
            self.memory.lock().expect("memory tier mutex poisoned").insert(entry);
            return Ok(Some(outcome));
        }

        Ok(None)
    }

    async fn fetch_and_store(
        &self,
        uri: &str,
        resolved: &ResolvedReference,
        storage: &Arc<StorageManager>,
        fetch_options: &FetchOptions,
        options: &GetOptions,
        now: i64,
    ) -> Result<GetOutcome> {
        let ttl = options.ttl_override.unwrap_or(self.default_ttl);
        let resolved = resolved.clone();
        let storage = Arc::clone(storage);
        let fetch_options = fetch_options.clone();

        let fetch_result = self
            .single_flight
            .run(uri, move || {
                async move {
                    let result = storage.fetch(&resolved, &fetch_options).await?;
                    Ok(serde_json::to_vec(&EncodedFetch {
                        content: result.content,
                        content_type: result.content_type,
                        source: result.source,
                    })
                    .expect("EncodedFetch serialization is infallible"))
                }
                .boxed()
            })
            .await;

        match fetch_result {
            Ok(bytes) => {
                let encoded: EncodedFetch =
                    serde_json::from_slice(&bytes).expect("EncodedFetch deserialization is infallible");
                let entry = CacheEntry::new(uri, encoded.content.clone(), encoded.content_type.clone(), encoded.source.clone(), ttl, now);
                self.store_entry(entry).await?;
                Ok(GetOutcome {
                    content: encoded.content,
                    content_type: encoded.content_type,
                    from_cache: false,
                    source: encoded.source,
                    needs_revalidation: false,
                })
            }
            Err(e) => {
                if self.fallback_to_stale {
                    if let Some(stale) = self.read_stale_ignoring_expiry(uri).await? {
                        warn!(uri, error = %e, "provider fetch failed, falling back to stale entry");
                        return Ok(stale);
                    }
                }
                Err(e)
            }
        }
    }

    async fn read_stale_ignoring_expiry(&self, uri: &str) -> Result<Option<GetOutcome>> {
        if let Some(entry) = self.memory.lock().expect("memory tier mutex poisoned").get(uri) {
            return Ok(Some(GetOutcome {
                content: entry.content.clone(),
                content_type: entry.content_type.clone(),
                from_cache: true,
                source: entry.source.clone(),
                needs_revalidation: false,
            }));
        }
        let mut index = self.index.write().await;
        if let Some(entry) = index.get(uri).await? {
            return Ok(Some(GetOutcome {
                content: entry.content.clone(),
                content_type: entry.content_type.clone(),
                from_cache: true,
                source: entry.source,
                needs_revalidation: false,
            }));
        }
        Ok(None)
    }

    async fn store_entry(&self, entry: CacheEntry) -> Result<()> {
        self.index.write().await.put(&entry).await?;
        self.memory.lock().expect("memory tier mutex poisoned").insert(entry);
        Ok(())
    }

    /// Explicitly set a URI's content, bypassing provider dispatch.
    pub async fn set(&self, uri: &str, content: Vec<u8>, content_type: Option<String>, source: &str, ttl: u64, now: i64) -> Result<()> {
        let entry = CacheEntry::new(uri, content, content_type, source, ttl, now);
        self.store_entry(entry).await
    }

    /// Revalidate a (presumably stale) URI against `storage`. Only one
    /// revalidation runs per URI at a time, tracked via the
    /// `revalidating` set; failures are logged and the stale entry is
    /// left untouched. Callers that want this to run in the background
    /// should `tokio::spawn` it against cloned `Arc`s.
    #[instrument(skip_all, fields(uri = resolved.reference.original_uri()))]
    pub async fn revalidate(&self, resolved: &ResolvedReference, storage: &StorageManager, fetch_options: &FetchOptions, ttl: u64, now: i64) {
        let uri = resolved.reference.original_uri().to_string();
        {
            let mut revalidating = self.revalidating.lock().expect("revalidating set mutex poisoned");
            if revalidating.contains(&uri) {
                return;
            }
            revalidating.insert(uri.clone());
        }

        match storage.fetch(resolved, fetch_options).await {
            Ok(result) => {
                let entry = CacheEntry::new(&uri, result.content, result.content_type, result.source, ttl, now);
                if let Err(e) = self.store_entry(entry).await {
                    warn!(uri, error = %e, "failed to persist revalidated entry");
                }
            }
            Err(e) => {
                warn!(uri, error = %e, "revalidation failed, keeping stale entry");
            }
        }

        self.revalidating.lock().expect("revalidating set mutex poisoned").remove(&uri);
    }

    /// Remove the entry from both tiers.
    pub async fn invalidate(&self, uri: &str) -> Result<()> {
        self.memory.lock().expect("memory tier mutex poisoned").remove(uri);
        self.index.write().await.invalidate(uri).await?;
        Ok(())
    }

    /// Remove every entry whose URI matches `pattern`; returns the count.
    pub async fn invalidate_pattern(&self, pattern: &lazy_regex::Regex) -> Result<usize> {
        let removed_memory = self
            .memory
            .lock()
            .expect("memory tier mutex poisoned")
            .retain_removing(|uri| pattern.is_match(uri));
        let removed_index = self.index.write().await.invalidate_matching(|uri| pattern.is_match(uri)).await?;
        Ok(removed_memory.max(removed_index))
    }

    pub async fn clear(&self) -> Result<()> {
        self.memory.lock().expect("memory tier mutex poisoned").clear();
        self.index.write().await.clear().await
    }

    pub async fn stats(&self, now: i64) -> CacheStats {
        let index = self.index.read().await;
        let mut stats = CacheStats::default();
        for (_, entry) in index.entries() {
            stats.entry_count += 1;
            stats.total_bytes += entry.size;
            match status_of(entry.expires_at, now, self.stale_window) {
                CacheStatus::Fresh => stats.fresh += 1,
                CacheStatus::Stale => stats.stale += 1,
                CacheStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }

    pub async fn list_entries(&self, options: &ListOptions, now: i64) -> Vec<ListedEntry> {
        let index = self.index.read().await;
        let mut entries: Vec<ListedEntry> = index
            .entries()
            .map(|(uri, entry)| ListedEntry {
                uri: uri.clone(),
                size: entry.size,
                content_type: entry.content_type.clone(),
                created_at: entry.created_at,
                expires_at: entry.expires_at,
                status: status_of(entry.expires_at, now, self.stale_window),
                source: entry.source.clone(),
            })
            .filter(|entry| options.status.map(|s| s == entry.status).unwrap_or(true))
            .collect();

        entries.sort_by(|a, b| {
            let ordering = match options.sort_by {
                SortBy::Uri => a.uri.cmp(&b.uri),
                SortBy::Size => a.size.cmp(&b.size),
                SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                SortBy::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            };
            if options.descending { ordering.reverse() } else { ordering }
        });

        let offset = options.offset.min(entries.len());
        let end = match options.limit {
            Some(limit) => (offset + limit).min(entries.len()),
            None => entries.len(),
        };
        entries[offset..end].to_vec()
    }
}

fn status_of(expires_at: i64, now: i64, stale_window: u64) -> CacheStatus {
    if now <= expires_at {
        CacheStatus::Fresh
    } else if now <= expires_at + stale_window as i64 {
        CacheStatus::Stale
    } else {
        CacheStatus::Expired
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct EncodedFetch {
    content: Vec<u8>,
    content_type: Option<String>,
    source: String,
}
