//! Storage provider interface (component B) and the providers the core
//! ships: local filesystem, file-plugin, GitHub, HTTP, and S3-archive.
//!
//! The trait is written against `async-trait` rather than native
//! async-fn-in-trait, because the storage manager needs `Vec<Box<dyn
//! StorageProvider>>` — runtime-dynamic dispatch over a priority-ordered
//! list — which native `impl Future`-returning methods cannot support.

pub mod file_plugin;
pub mod github;
pub mod http;
pub mod local;
pub mod s3_archive;

use async_trait::async_trait;
use bon::Builder;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::reference::ResolvedReference;

/// What a provider fetched: content plus enough metadata for the cache to
/// store it. Non-persistent — the cache engine converts this into a
/// [`crate::cache::entry::CacheEntry`].
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub size: u64,
    pub source: String,
    pub metadata: HashMap<String, String>,
}

impl FetchResult {
    pub fn new(content: Vec<u8>, source: impl Into<String>) -> Self {
        let size = content.len() as u64;
        Self {
            content,
            content_type: None,
            size,
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Auth and transport options resolved by the storage manager from
/// configuration before dispatch. Providers that don't need a field
/// ignore it.
#[derive(Clone, Debug, Default, Builder)]
pub struct FetchOptions {
    #[builder(into)]
    pub token: Option<String>,
    pub headers: HashMap<String, String>,
    #[builder(into)]
    pub branch: Option<String>,
    pub timeout: Option<Duration>,
    pub max_size: Option<u64>,
}

/// Uniform contract every storage provider implements.
///
/// `exists` MAY be implemented as fetch-and-discard if no cheaper
/// mechanism is available; implementations that do this document it.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// A short, stable name used in diagnostics (`"local"`, `"github"`, …).
    fn name(&self) -> &str;

    /// Pure, cheap predicate: can this provider plausibly serve `reference`?
    fn can_handle(&self, reference: &ResolvedReference) -> bool;

    /// Fetch the referenced content.
    async fn fetch(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<FetchResult>;

    /// Report whether the referenced content exists.
    async fn exists(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<bool>;
}
