//! The `s3-archive` provider: read-only access to object storage via an
//! out-of-process helper binary, per spec.md §9's "subprocess
//! collaborators" note.
//!
//! Contract with the helper binary: invoked as
//! `{binary} get --bucket {bucket} --key {prefix}/{path}`; stdout is the
//! object content on success; a non-zero exit status is a fetch failure
//! (stderr is folded into the error message).

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{instrument, warn};

use crate::config::ArchiveProjectConfig;
use crate::error::{CodexError, Result};
use crate::reference::ResolvedReference;

use super::{FetchOptions, FetchResult, StorageProvider};

pub struct S3ArchiveProvider {
    helper_binary: PathBuf,
    /// Archive configuration keyed by `{org}/{project}`.
    projects: std::collections::HashMap<String, ArchiveProjectConfig>,
}

impl S3ArchiveProvider {
    pub fn new(
        helper_binary: impl Into<PathBuf>,
        projects: std::collections::HashMap<String, ArchiveProjectConfig>,
    ) -> Self {
        Self {
            helper_binary: helper_binary.into(),
            projects,
        }
    }

    fn project_config(&self, reference: &ResolvedReference) -> Option<&ArchiveProjectConfig> {
        let key = format!("{}/{}", reference.reference.organization, reference.reference.project);
        self.projects.get(&key)
    }

    fn matches_archive_patterns(config: &ArchiveProjectConfig, path: &str) -> bool {
        if config.patterns.is_empty() {
            return true;
        }
        config.patterns.iter().any(|pattern| {
            globset::Glob::new(pattern)
                .map(|glob| glob.compile_matcher().is_match(path))
                .unwrap_or(false)
        })
    }
}

#[async_trait::async_trait]
impl StorageProvider for S3ArchiveProvider {
    fn name(&self) -> &str {
        "s3-archive"
    }

    fn can_handle(&self, reference: &ResolvedReference) -> bool {
        if !reference.is_current_project {
            return false;
        }
        match self.project_config(reference) {
            Some(config) => config.enabled && Self::matches_archive_patterns(config, &reference.reference.path),
            None => false,
        }
    }

    #[instrument(skip(self, _options), fields(provider = "s3-archive"))]
    async fn fetch(&self, reference: &ResolvedReference, _options: &FetchOptions) -> Result<FetchResult> {
        let config = self.project_config(reference).ok_or_else(|| CodexError::NoProvider {
            uri: reference.reference.original_uri().to_string(),
        })?;

        let key = format!("{}/{}", config.prefix.trim_end_matches('/'), reference.reference.path);

        let output = Command::new(&self.helper_binary)
            .arg("get")
            .arg("--bucket")
            .arg(&config.bucket)
            .arg("--key")
            .arg(&key)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| CodexError::io(&self.helper_binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(%stderr, status = ?output.status, "s3-archive helper exited non-zero");
            if stderr.to_lowercase().contains("not found") || stderr.to_lowercase().contains("nosuchkey") {
                return Err(CodexError::NotFound {
                    uri: reference.reference.original_uri().to_string(),
                    providers: vec![self.name().to_string()],
                });
            }
            return Err(CodexError::Network {
                provider: self.name().to_string(),
                message: stderr,
            });
        }

        Ok(FetchResult::new(output.stdout, self.name()))
    }

    #[instrument(skip(self, options), fields(provider = "s3-archive"))]
    async fn exists(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<bool> {
        match self.fetch(reference, options).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Reference, ResolutionContext};
    use std::path::PathBuf;

    fn resolved(path: &str) -> ResolvedReference {
        let reference = Reference::parse(&format!("codex://acme/docs/{path}")).unwrap();
        let ctx = ResolutionContext {
            current_organization: Some("acme".into()),
            current_project: Some("docs".into()),
            cache_root: PathBuf::from("/tmp/cache"),
        };
        ResolvedReference::resolve(reference, &ctx, None)
    }

    fn config(enabled: bool, patterns: Vec<&str>) -> ArchiveProjectConfig {
        ArchiveProjectConfig {
            enabled,
            handler: "s3".into(),
            bucket: "codex-archive".into(),
            prefix: "acme/docs".into(),
            patterns: patterns.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn can_handle_requires_enabled_project_config() {
        let mut projects = std::collections::HashMap::new();
        projects.insert("acme/docs".to_string(), config(true, vec![]));
        let provider = S3ArchiveProvider::new("/usr/bin/codex-s3-helper", projects);
        assert!(provider.can_handle(&resolved("archive/old.md")));
    }

    #[test]
    fn can_handle_respects_disabled_config() {
        let mut projects = std::collections::HashMap::new();
        projects.insert("acme/docs".to_string(), config(false, vec![]));
        let provider = S3ArchiveProvider::new("/usr/bin/codex-s3-helper", projects);
        assert!(!provider.can_handle(&resolved("archive/old.md")));
    }

    #[test]
    fn can_handle_filters_by_pattern() {
        let mut projects = std::collections::HashMap::new();
        projects.insert("acme/docs".to_string(), config(true, vec!["archive/**"]));
        let provider = S3ArchiveProvider::new("/usr/bin/codex-s3-helper", projects);
        assert!(provider.can_handle(&resolved("archive/old.md")));
        assert!(!provider.can_handle(&resolved("active/new.md")));
    }

    #[tokio::test]
    async fn fetch_with_missing_binary_is_io_error() {
        let mut projects = std::collections::HashMap::new();
        projects.insert("acme/docs".to_string(), config(true, vec![]));
        let provider = S3ArchiveProvider::new("/nonexistent/codex-s3-helper-binary", projects);
        let err = provider
            .fetch(&resolved("archive/old.md"), &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CodexError::Io { .. }));
    }
}
