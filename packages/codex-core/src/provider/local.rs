//! The `local` provider: reads directly from the filesystem under a
//! configured base directory, for current-project references that are
//! not file-plugin mounts.

use std::path::PathBuf;

use tracing::instrument;

use crate::error::{CodexError, Result};
use crate::reference::{ResolvedReference, SourceType};

use super::{FetchOptions, FetchResult, StorageProvider};

pub struct LocalProvider {
    base_path: PathBuf,
    max_size: Option<u64>,
}

impl LocalProvider {
    pub fn new(base_path: impl Into<PathBuf>, max_size: Option<u64>) -> Self {
        Self {
            base_path: base_path.into(),
            max_size,
        }
    }

    fn resolve_path(&self, reference: &ResolvedReference) -> PathBuf {
        reference
            .local_path
            .clone()
            .unwrap_or_else(|| self.base_path.join(&reference.reference.path))
    }
}

#[async_trait::async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn can_handle(&self, reference: &ResolvedReference) -> bool {
        reference.is_current_project
            && reference.local_path.is_some()
            && reference.source_type != Some(SourceType::FilePlugin)
    }

    #[instrument(skip(self, options), fields(provider = "local"))]
    async fn fetch(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<FetchResult> {
        let path = self.resolve_path(reference);
        let max_size = options.max_size.or(self.max_size);

        if let Some(max_size) = max_size {
            if let Ok(metadata) = tokio::fs::metadata(&path).await {
                if metadata.len() > max_size {
                    return Err(CodexError::TooLarge {
                        provider: self.name().to_string(),
                        size: metadata.len(),
                        max: max_size,
                    });
                }
            }
        }

        let content = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CodexError::NotFound {
                    uri: reference.reference.original_uri().to_string(),
                    providers: vec![self.name().to_string()],
                }
            } else {
                CodexError::io(&path, e)
            }
        })?;

        Ok(FetchResult::new(content, self.name()))
    }

    #[instrument(skip(self, _options), fields(provider = "local"))]
    async fn exists(&self, reference: &ResolvedReference, _options: &FetchOptions) -> Result<bool> {
        let path = self.resolve_path(reference);
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Reference, ResolutionContext};
    use pretty_assertions::assert_eq as pretty_assert_eq;

    fn resolved(path: &str, local_path: PathBuf) -> ResolvedReference {
        let reference = Reference::parse(&format!("codex://acme/docs/{path}")).unwrap();
        let ctx = ResolutionContext {
            current_organization: Some("acme".into()),
            current_project: Some("docs".into()),
            cache_root: PathBuf::from("/tmp/cache"),
        };
        let mut r = ResolvedReference::resolve(reference, &ctx, None);
        r.local_path = Some(local_path);
        r
    }

    #[tokio::test]
    async fn fetch_reads_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("readme.md");
        tokio::fs::write(&file_path, b"hello").await.unwrap();

        let provider = LocalProvider::new(dir.path(), None);
        let reference = resolved("readme.md", file_path);
        let result = provider.fetch(&reference, &FetchOptions::default()).await.unwrap();
        pretty_assert_eq!(result.content, b"hello".to_vec());
    }

    #[tokio::test]
    async fn fetch_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path(), None);
        let reference = resolved("missing.md", dir.path().join("missing.md"));
        let err = provider.fetch(&reference, &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, CodexError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_enforces_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("big.bin");
        tokio::fs::write(&file_path, vec![0u8; 100]).await.unwrap();

        let provider = LocalProvider::new(dir.path(), Some(10));
        let reference = resolved("big.bin", file_path);
        let err = provider.fetch(&reference, &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, CodexError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn exists_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("readme.md");
        tokio::fs::write(&file_path, b"hello").await.unwrap();

        let provider = LocalProvider::new(dir.path(), None);
        let reference = resolved("readme.md", file_path.clone());
        assert!(provider.exists(&reference, &FetchOptions::default()).await.unwrap());

        let missing = resolved("missing.md", dir.path().join("missing.md"));
        assert!(!provider.exists(&missing, &FetchOptions::default()).await.unwrap());
    }
}
