//! The durable on-disk tier: one content file per entry, plus a single
//! version-tagged `cache-index.json` index. Both are written via
//! write-temp-then-rename so a reader never observes a torn write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{instrument, trace, warn};

use crate::error::Result;
use crate::fs_util;
use crate::hash::ContentHash;

use super::entry::CacheEntry;

const INDEX_VERSION: u32 = 1;
const INDEX_FILE_NAME: &str = "cache-index.json";

/// One index entry: everything about a `CacheEntry` except its bytes,
/// plus the relative path to the content file holding them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub content_type: Option<String>,
    pub size: u64,
    pub hash: ContentHash,
    pub created_at: i64,
    pub ttl: u64,
    pub expires_at: i64,
    pub last_accessed: i64,
    pub source: String,
    /// Fields not recognized by this version of the schema are preserved
    /// on write-back, per the index's forward-compatibility contract.
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl IndexEntry {
    fn from_cache_entry(entry: &CacheEntry, content_path: &str) -> Self {
        Self {
            path: content_path.to_string(),
            content_type: entry.content_type.clone(),
            size: entry.size,
            hash: entry.hash.clone(),
            created_at: entry.created_at,
            ttl: entry.ttl,
            expires_at: entry.expires_at,
            last_accessed: entry.last_accessed,
            source: entry.source.clone(),
            unknown_fields: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: HashMap<String, IndexEntry>,
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// The durable catalogue of on-disk entries, plus the content store
/// itself. Lives under `cache_root`.
pub struct CacheIndex {
    root: PathBuf,
    index: IndexFile,
}

impl CacheIndex {
    /// Load the index from `cache_root`. If the index is missing but
    /// content files exist, behaves as empty (stale content files are
    /// garbage). If the index is corrupt, logs and treats it as empty
    /// without deleting on-disk content (operator may recover).
    #[instrument(skip_all)]
    pub async fn open(cache_root: impl Into<PathBuf>) -> Result<Self> {
        let root = cache_root.into();
        fs_util::create_dir_all(&root).await?;
        fs_util::create_dir_all(&root.join("content")).await?;

        let index_path = root.join(INDEX_FILE_NAME);
        let index = match fs_util::read_optional(&index_path).await? {
            None => IndexFile::default(),
            Some(bytes) => match serde_json::from_slice::<IndexFile>(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "corrupt cache index, treating as empty");
                    IndexFile::default()
                }
            },
        };

        Ok(Self { root, index })
    }

    fn content_path(&self, hash: &ContentHash) -> PathBuf {
        let (prefix, rest) = hash.split_prefix();
        self.root.join("content").join(prefix).join(rest)
    }

    fn relative_content_path(&self, hash: &ContentHash) -> String {
        let (prefix, rest) = hash.split_prefix();
        format!("content/{prefix}/{rest}")
    }

    /// Persist an entry's content and metadata. Writes the content file
    /// first, then the index (temp-then-rename for both).
    #[instrument(skip(self, entry))]
    pub async fn put(&mut self, entry: &CacheEntry) -> Result<()> {
        let content_path = self.content_path(&entry.hash);
        fs_util::write_atomic(&content_path, &entry.content).await?;

        let relative_path = self.relative_content_path(&entry.hash);
        let index_entry = IndexEntry::from_cache_entry(entry, &relative_path);
        self.index.entries.insert(entry.uri.clone(), index_entry);
        self.persist_index().await
    }

    /// Read an entry's content and metadata back, self-healing by
    /// dropping the index entry if the listed content file is missing.
    #[instrument(skip(self))]
    pub async fn get(&mut self, uri: &str) -> Result<Option<CacheEntry>> {
        let Some(index_entry) = self.index.entries.get(uri).cloned() else {
            return Ok(None);
        };

        let content_path = self.root.join(&index_entry.path);
        match fs_util::read_optional(&content_path).await? {
            Some(content) => Ok(Some(CacheEntry {
                uri: uri.to_string(),
                content,
                content_type: index_entry.content_type,
                size: index_entry.size,
                hash: index_entry.hash,
                created_at: index_entry.created_at,
                ttl: index_entry.ttl,
                expires_at: index_entry.expires_at,
                last_accessed: index_entry.last_accessed,
                source: index_entry.source,
            })),
            None => {
                trace!(uri, "dropping index entry with missing content file");
                self.index.entries.remove(uri);
                self.persist_index().await?;
                Ok(None)
            }
        }
    }

    /// Update only the `last_accessed` metadata field for an entry.
    pub async fn touch(&mut self, uri: &str, now: i64) -> Result<()> {
        if let Some(entry) = self.index.entries.get_mut(uri) {
            entry.last_accessed = now;
            self.persist_index().await?;
        }
        Ok(())
    }

    /// Remove an entry from the index. The content file is left in place
    /// (shared by hash — removal here is a cheap metadata-only op; a
    /// separate sweep may garbage-collect orphaned content files).
    #[instrument(skip(self))]
    pub async fn invalidate(&mut self, uri: &str) -> Result<bool> {
        let removed = self.index.entries.remove(uri).is_some();
        if removed {
            self.persist_index().await?;
        }
        Ok(removed)
    }

    /// Remove every entry whose URI matches `predicate`. Returns the count removed.
    pub async fn invalidate_matching(&mut self, mut predicate: impl FnMut(&str) -> bool) -> Result<usize> {
        let matching: Vec<String> = self
            .index
            .entries
            .keys()
            .filter(|uri| predicate(uri))
            .cloned()
            .collect();
        let count = matching.len();
        for uri in matching {
            self.index.entries.remove(&uri);
        }
        if count > 0 {
            self.persist_index().await?;
        }
        Ok(count)
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.index.entries.clear();
        self.persist_index().await
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.index.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    async fn persist_index(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index).expect("IndexFile serialization is infallible");
        fs_util::write_atomic(&self.root.join(INDEX_FILE_NAME), &bytes).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
