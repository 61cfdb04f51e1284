//! The durable per-`(org, project)` sync manifest: records what was
//! last synced, so a subsequent sync can detect out-of-band changes and
//! support at-least-once execution semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::Result;
use crate::fs_util;
use crate::hash::ContentHash;

const MANIFEST_VERSION: u32 = 1;
const MANIFEST_FILE_NAME: &str = ".fractary/codex-sync-manifest.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub hash: ContentHash,
    pub size: u64,
    pub synced_at: i64,
    pub source: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncManifest {
    pub version: u32,
    pub organization: String,
    pub project: String,
    pub last_sync: i64,
    pub entries: HashMap<String, ManifestEntry>,
    #[serde(skip)]
    root: PathBuf,
}

impl SyncManifest {
    fn path_for(working_tree_root: &Path) -> PathBuf {
        working_tree_root.join(MANIFEST_FILE_NAME)
    }

    /// Load the manifest for `(organization, project)` at
    /// `working_tree_root`, creating an empty one if absent. A manifest
    /// for a different `(org, project)` pair at the same path is a
    /// corruption condition (the invariant is one manifest per tree).
    #[instrument(skip_all)]
    pub async fn open(working_tree_root: impl Into<PathBuf>, organization: &str, project: &str) -> Result<Self> {
        let root = working_tree_root.into();
        let path = Self::path_for(&root);

        match fs_util::read_optional(&path).await? {
            None => Ok(Self {
                version: MANIFEST_VERSION,
                organization: organization.to_string(),
                project: project.to_string(),
                last_sync: 0,
                entries: HashMap::new(),
                root,
            }),
            Some(bytes) => match serde_json::from_slice::<SyncManifest>(&bytes) {
                Ok(mut manifest) => {
                    manifest.root = root;
                    Ok(manifest)
                }
                Err(e) => {
                    warn!(error = %e, "corrupt sync manifest, treating as empty");
                    Ok(Self {
                        version: MANIFEST_VERSION,
                        organization: organization.to_string(),
                        project: project.to_string(),
                        last_sync: 0,
                        entries: HashMap::new(),
                        root,
                    })
                }
            },
        }
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// Has this path changed on disk since the manifest recorded it?
    /// Used to distinguish a true bidirectional conflict from a
    /// one-sided update.
    pub fn changed_since(&self, path: &str, current_hash: &ContentHash) -> bool {
        match self.entries.get(path) {
            Some(entry) => &entry.hash != current_hash,
            None => true,
        }
    }

    pub fn record_synced(&mut self, path: impl Into<String>, hash: ContentHash, size: u64, source: impl Into<String>, now: i64) {
        self.entries.insert(
            path.into(),
            ManifestEntry {
                hash,
                size,
                synced_at: now,
                source: source.into(),
            },
        );
    }

    pub fn record_deleted(&mut self, path: &str) {
        self.entries.remove(path);
    }

    #[instrument(skip(self))]
    pub async fn persist(&mut self, now: i64) -> Result<()> {
        self.last_sync = now;
        let path = Self::path_for(&self.root);
        let bytes = serde_json::to_vec_pretty(self).expect("SyncManifest serialization is infallible");
        fs_util::write_atomic(&path, &bytes).await
    }
}
