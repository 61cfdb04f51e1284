//! The `http` provider: last-resort fetch against a base URL with
//! configured headers, for remote references no other provider handles.

use tracing::instrument;

use crate::error::{CodexError, Result};
use crate::reference::ResolvedReference;

use super::{FetchOptions, FetchResult, StorageProvider};

pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, reference: &ResolvedReference) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            reference.reference.organization,
            reference.reference.project,
            reference.reference.path
        )
    }
}

#[async_trait::async_trait]
impl StorageProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn can_handle(&self, reference: &ResolvedReference) -> bool {
        !reference.is_current_project
    }

    #[instrument(skip(self, options), fields(provider = "http"))]
    async fn fetch(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<FetchResult> {
        let url = self.url_for(reference);
        let mut request = self.client.get(&url);
        for (key, value) in &options.headers {
            request = request.header(key, value);
        }
        if let Some(token) = &options.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| map_reqwest_error(self.name(), &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CodexError::NotFound {
                uri: reference.reference.original_uri().to_string(),
                providers: vec![self.name().to_string()],
            });
        }
        if !response.status().is_success() {
            return Err(CodexError::Network {
                provider: self.name().to_string(),
                message: format!("unexpected status {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await.map_err(|e| map_reqwest_error(self.name(), &e))?;
        let mut result = FetchResult::new(bytes.to_vec(), self.name());
        if let Some(content_type) = content_type {
            result = result.with_content_type(content_type);
        }
        Ok(result)
    }

    #[instrument(skip(self, options), fields(provider = "http"))]
    async fn exists(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<bool> {
        let url = self.url_for(reference);
        let mut request = self.client.head(&url);
        if let Some(token) = &options.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn map_reqwest_error(provider: &str, source: &reqwest::Error) -> CodexError {
    if source.is_timeout() {
        CodexError::Timeout {
            operation: format!("{provider} fetch"),
            elapsed: std::time::Duration::from_secs(30),
        }
    } else {
        CodexError::Network {
            provider: provider.to_string(),
            message: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{Reference, ResolutionContext};
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use std::path::PathBuf;

    fn resolved(path: &str) -> ResolvedReference {
        let reference = Reference::parse(&format!("codex://acme/docs/{path}")).unwrap();
        let ctx = ResolutionContext {
            current_organization: Some("other-org".into()),
            current_project: Some("other-proj".into()),
            cache_root: PathBuf::from("/tmp/cache"),
        };
        ResolvedReference::resolve(reference, &ctx, None)
    }

    #[test]
    fn url_for_joins_base_org_project_path() {
        let provider = HttpProvider::new("https://codex.example.com/api");
        let url = provider.url_for(&resolved("readme.md"));
        pretty_assert_eq!(url, "https://codex.example.com/api/acme/docs/readme.md");
    }

    #[test]
    fn can_handle_only_remote_references() {
        let provider = HttpProvider::new("https://codex.example.com/api");
        assert!(provider.can_handle(&resolved("readme.md")));
    }
}
