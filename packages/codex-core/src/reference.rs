//! Parsing and resolution of `codex://{org}/{project}/{path}` references.
//!
//! Parsing is pure and I/O-free: it only validates grammar. Resolution
//! augments a parsed reference with context (current-project identity,
//! file-plugin source mapping) and is also I/O-free — it only reads the
//! context it's handed.

use std::path::PathBuf;

use derive_more::Display;
use lazy_regex::{Lazy, Regex, lazy_regex};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CodexError, Result};

const MAX_URI_LEN: usize = 4096;
const MAX_SEGMENT_LEN: usize = 255;

static ORG_PROJECT_RE: Lazy<Regex> = lazy_regex!(r"^[A-Za-z0-9._-]+$");

/// The storage source a resolved reference is expected to come from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Local,
    #[display("file-plugin")]
    #[serde(rename = "file-plugin")]
    FilePlugin,
    Github,
    Http,
    #[display("s3-archive")]
    #[serde(rename = "s3-archive")]
    S3Archive,
}

/// The parsed form of a `codex://` URI.
///
/// Invariant: if `path` is non-empty it contains no `..` segments after
/// normalization and is not absolute.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
#[display("codex://{organization}/{project}/{path}")]
pub struct Reference {
    pub organization: String,
    pub project: String,
    pub path: String,
    original_uri: String,
}

impl Reference {
    /// Parse a `codex://{org}/{project}/{path}` URI.
    ///
    /// No I/O. Fails with `InvalidUri` on any grammar violation; a
    /// reference to a non-existent resource still parses successfully.
    pub fn parse(uri: &str) -> Result<Self> {
        if uri.len() > MAX_URI_LEN {
            return Err(invalid(uri, "uri exceeds maximum length"));
        }

        let rest = uri
            .strip_prefix("codex://")
            .ok_or_else(|| invalid(uri, "missing codex:// scheme"))?;

        let mut parts = rest.splitn(3, '/');
        let organization = parts.next().unwrap_or_default();
        let project = parts.next().ok_or_else(|| invalid(uri, "missing project segment"))?;
        let path = parts.next().unwrap_or_default();

        if organization.is_empty() || !ORG_PROJECT_RE.is_match(organization) {
            return Err(invalid(uri, "invalid organization segment"));
        }
        if project.is_empty() || !ORG_PROJECT_RE.is_match(project) {
            return Err(invalid(uri, "invalid project segment"));
        }

        validate_path(uri, path)?;

        Ok(Self {
            organization: organization.to_string(),
            project: project.to_string(),
            path: path.to_string(),
            original_uri: uri.to_string(),
        })
    }

    /// The original URI string this reference was parsed from.
    pub fn original_uri(&self) -> &str {
        &self.original_uri
    }

    /// Render back to a canonical `codex://` URI. `parse(r.format()) == r`
    /// for every well-formed reference.
    pub fn format(&self) -> String {
        if self.path.is_empty() {
            format!("codex://{}/{}", self.organization, self.project)
        } else {
            format!("codex://{}/{}/{}", self.organization, self.project, self.path)
        }
    }
}

fn validate_path(uri: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    if path.starts_with('/') {
        return Err(invalid(uri, "path must not be absolute"));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid(uri, "path contains an invalid segment"));
        }
        if segment.len() > MAX_SEGMENT_LEN {
            return Err(invalid(uri, "path segment exceeds maximum length"));
        }
    }
    Ok(())
}

fn invalid(uri: &str, reason: &str) -> CodexError {
    CodexError::InvalidUri {
        uri: uri.to_string(),
        reason: reason.to_string(),
    }
}

/// Resolution context supplied by the caller; missing fields fall back to
/// environment variables and then simply leave the reference non-current.
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    pub current_organization: Option<String>,
    pub current_project: Option<String>,
    pub cache_root: PathBuf,
}

impl ResolutionContext {
    fn resolve_current_project(&self) -> (Option<String>, Option<String>) {
        let org = self
            .current_organization
            .clone()
            .or_else(|| std::env::var("CODEX_CURRENT_ORG").ok());
        let project = self
            .current_project
            .clone()
            .or_else(|| std::env::var("CODEX_CURRENT_PROJECT").ok());
        (org, project)
    }
}

/// A [`Reference`] augmented with resolution context.
///
/// Invariant: `source_type == Some(FilePlugin) => is_current_project &&
/// file_plugin_source_name.is_some()`.
#[derive(Clone, Debug)]
pub struct ResolvedReference {
    pub reference: Reference,
    pub cache_path: PathBuf,
    pub is_current_project: bool,
    pub local_path: Option<PathBuf>,
    pub source_type: Option<SourceType>,
    pub file_plugin_source_name: Option<String>,
}

impl ResolvedReference {
    /// Resolve a parsed reference against context and optional unified
    /// configuration (needed for file-plugin source detection).
    pub fn resolve(reference: Reference, ctx: &ResolutionContext, config: Option<&Config>) -> Self {
        let (current_org, current_project) = ctx.resolve_current_project();
        let is_current_project = current_org.as_deref() == Some(reference.organization.as_str())
            && current_project.as_deref() == Some(reference.project.as_str());

        let cache_hash = crate::hash::ContentHash::from_str_key(&reference.format());
        let (prefix, rest) = cache_hash.split_prefix();
        let cache_path = ctx.cache_root.join("content").join(prefix).join(rest);

        let mut resolved = Self {
            reference,
            cache_path,
            is_current_project,
            local_path: None,
            source_type: None,
            file_plugin_source_name: None,
        };

        if is_current_project {
            if let Some(config) = config {
                if let Some((name, local_path)) = detect_file_plugin_source(&resolved.reference.path, config) {
                    resolved.source_type = Some(SourceType::FilePlugin);
                    resolved.file_plugin_source_name = Some(name);
                    resolved.local_path = Some(local_path);
                    return resolved;
                }
            }
            resolved.source_type = Some(SourceType::Local);
        }

        resolved
    }
}

/// Normalize a reference path for file-plugin comparison: strip a leading
/// `./` or `/`, case-fold.
fn normalize_for_comparison(path: &str) -> String {
    path.trim_start_matches("./").trim_start_matches('/').to_lowercase()
}

/// Find the longest `file.sources.*.local.base_path` that is a prefix of
/// the normalized reference path (or whose final segment equals the
/// path's first segment), per spec.md §4.A. Returns the source name and
/// the joined local path.
fn detect_file_plugin_source(ref_path: &str, config: &Config) -> Option<(String, PathBuf)> {
    let normalized = normalize_for_comparison(ref_path);

    let mut best: Option<(String, PathBuf, usize)> = None;

    for (name, source) in &config.file_sources {
        let base = normalize_for_comparison(&source.local_base_path);
        let base_len = base.len();

        let is_prefix = normalized == base || normalized.starts_with(&format!("{base}/"));
        let final_segment_match = std::path::Path::new(&base)
            .file_name()
            .map(|f| f.to_string_lossy().to_lowercase())
            .as_deref()
            == normalized.split('/').next();

        if is_prefix || final_segment_match {
            let remainder = normalized.strip_prefix(&base).unwrap_or(&normalized).trim_start_matches('/');
            let local_path = PathBuf::from(&source.local_base_path).join(remainder);

            let better = match &best {
                Some((_, _, best_len)) => base_len > *best_len,
                None => true,
            };
            if better {
                best = Some((name.clone(), local_path, base_len));
            }
        }
    }

    best.map(|(name, path, _)| (name, path))
}
