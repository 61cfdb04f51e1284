//! The `file-plugin` provider: reads the resolved `local_path` of a
//! current-project reference that mapped to a `file.sources.*` mount. A
//! `NotFound` from this provider is enriched with remediation text naming
//! the source and its remote kind, since these mounts usually back onto a
//! remote bucket the user needs to sync first.

use tracing::instrument;

use crate::error::{CodexError, Result};
use crate::reference::{ResolvedReference, SourceType};

use super::{FetchOptions, FetchResult, StorageProvider};

pub struct FilePluginProvider {
    /// Maps source name -> human-readable remote kind, e.g. `"specs" ->
    /// "S3"`, used only to enrich not-found diagnostics.
    remote_kinds: std::collections::HashMap<String, String>,
}

impl FilePluginProvider {
    pub fn new(remote_kinds: std::collections::HashMap<String, String>) -> Self {
        Self { remote_kinds }
    }
}

#[async_trait::async_trait]
impl StorageProvider for FilePluginProvider {
    fn name(&self) -> &str {
        "file-plugin"
    }

    fn can_handle(&self, reference: &ResolvedReference) -> bool {
        reference.is_current_project && reference.source_type == Some(SourceType::FilePlugin)
    }

    #[instrument(skip(self, _options), fields(provider = "file-plugin"))]
    async fn fetch(&self, reference: &ResolvedReference, _options: &FetchOptions) -> Result<FetchResult> {
        let Some(local_path) = &reference.local_path else {
            return Err(CodexError::NoProvider {
                uri: reference.reference.original_uri().to_string(),
            });
        };

        let content = tokio::fs::read(local_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                let source_name = reference.file_plugin_source_name.as_deref().unwrap_or("unknown");
                let remote_kind = self
                    .remote_kinds
                    .get(source_name)
                    .map(String::as_str)
                    .unwrap_or("remote");
                CodexError::NotFound {
                    uri: reference.reference.original_uri().to_string(),
                    providers: vec![format!(
                        "file-plugin (source `{source_name}`, backed by {remote_kind} — sync it before fetching)"
                    )],
                }
            } else {
                CodexError::io(local_path, e)
            }
        })?;

        Ok(FetchResult::new(content, self.name()))
    }

    #[instrument(skip(self, _options), fields(provider = "file-plugin"))]
    async fn exists(&self, reference: &ResolvedReference, _options: &FetchOptions) -> Result<bool> {
        let Some(local_path) = &reference.local_path else {
            return Ok(false);
        };
        Ok(tokio::fs::metadata(local_path).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FileSource};
    use crate::reference::{Reference, ResolutionContext};
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use std::path::PathBuf;

    fn resolved(project_root: &std::path::Path, base_path: &str, rel: &str) -> ResolvedReference {
        let reference = Reference::parse(&format!("codex://acme/proj/{base_path}/{rel}")).unwrap();
        let ctx = ResolutionContext {
            current_organization: Some("acme".into()),
            current_project: Some("proj".into()),
            cache_root: PathBuf::from("/tmp/cache"),
        };
        let mut file_sources = std::collections::HashMap::new();
        file_sources.insert(
            base_path.to_string(),
            FileSource {
                source_type: "s3".into(),
                bucket: None,
                prefix: None,
                local_base_path: project_root.join(base_path).to_string_lossy().into_owned(),
            },
        );
        let config = Config {
            file_sources,
            ..Config::default()
        };
        ResolvedReference::resolve(reference, &ctx, Some(&config))
    }

    #[tokio::test]
    async fn fetch_reads_mounted_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("specs")).await.unwrap();
        tokio::fs::write(dir.path().join("specs").join("SPEC-1.md"), b"v1")
            .await
            .unwrap();

        let reference = resolved(dir.path(), "specs", "SPEC-1.md");
        let provider = FilePluginProvider::new(Default::default());
        let result = provider.fetch(&reference, &FetchOptions::default()).await.unwrap();
        pretty_assert_eq!(result.content, b"v1".to_vec());
    }

    #[tokio::test]
    async fn fetch_reflects_live_edits_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("specs")).await.unwrap();
        let file_path = dir.path().join("specs").join("SPEC-1.md");
        tokio::fs::write(&file_path, b"v1").await.unwrap();

        let reference = resolved(dir.path(), "specs", "SPEC-1.md");
        let provider = FilePluginProvider::new(Default::default());
        let first = provider.fetch(&reference, &FetchOptions::default()).await.unwrap();
        pretty_assert_eq!(first.content, b"v1".to_vec());

        tokio::fs::write(&file_path, b"v2").await.unwrap();
        let second = provider.fetch(&reference, &FetchOptions::default()).await.unwrap();
        pretty_assert_eq!(second.content, b"v2".to_vec());
    }

    #[tokio::test]
    async fn fetch_missing_mount_names_source_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let reference = resolved(dir.path(), "specs", "SPEC-1.md");

        let mut remote_kinds = std::collections::HashMap::new();
        remote_kinds.insert("specs".to_string(), "S3".to_string());
        let provider = FilePluginProvider::new(remote_kinds);

        let err = provider.fetch(&reference, &FetchOptions::default()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("specs"));
        assert!(message.contains("S3"));
    }
}
