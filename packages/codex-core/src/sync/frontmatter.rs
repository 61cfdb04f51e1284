//! YAML frontmatter parsing for routing metadata. Per spec, a malformed
//! document degrades to empty metadata rather than failing the scan.

use std::collections::HashMap;

use gray_matter::Matter;
use gray_matter::engine::YAML;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The parsed frontmatter of a tracked document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, rename = "codex_sync_include")]
    pub codex_sync_include: Vec<String>,
    #[serde(default, rename = "codex_sync_exclude")]
    pub codex_sync_exclude: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml_ng::Value>,
}

/// Parse the frontmatter of `content`. Returns empty metadata (not an
/// error) if there is no frontmatter block or it fails to parse.
pub fn parse(content: &str) -> Metadata {
    let matter = Matter::<YAML>::new();
    let parsed = matter.parse(content);

    let Some(pod) = parsed.data else {
        return Metadata::default();
    };

    match pod.deserialize::<Metadata>() {
        Ok(metadata) => metadata,
        Err(e) => {
            trace!(error = %e, "frontmatter present but failed to deserialize, treating as empty");
            Metadata::default()
        }
    }
}
