//! The `github` provider: fetches content from a Git forge's contents API
//! against a configured branch, using a token resolved from configuration
//! with an environment-variable fallback (`GITHUB_TOKEN`).

use tracing::instrument;

use crate::error::{CodexError, Result};
use crate::reference::ResolvedReference;

use super::{FetchOptions, FetchResult, StorageProvider};

pub struct GithubProvider {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    default_branch: String,
}

impl GithubProvider {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, default_branch: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: "https://api.github.com".to_string(),
            owner: owner.into(),
            repo: repo.into(),
            default_branch: default_branch.into(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn resolve_token(&self, options: &FetchOptions) -> Option<String> {
        options.token.clone().or_else(|| std::env::var("GITHUB_TOKEN").ok())
    }

    fn raw_url(&self, reference: &ResolvedReference, branch: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}?ref={branch}",
            self.api_base, self.owner, self.repo, reference.reference.path
        )
    }
}

#[async_trait::async_trait]
impl StorageProvider for GithubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn can_handle(&self, reference: &ResolvedReference) -> bool {
        !reference.is_current_project
    }

    #[instrument(skip(self, options), fields(provider = "github"))]
    async fn fetch(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<FetchResult> {
        let branch = options.branch.clone().unwrap_or_else(|| self.default_branch.clone());
        let url = self.raw_url(reference, &branch);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.raw")
            .header("User-Agent", "codex-core");

        if let Some(token) = self.resolve_token(options) {
            request = request.bearer_auth(token);
        }
        for (key, value) in &options.headers {
            request = request.header(key, value);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| network_error(self.name(), &e))?;

        match response.status() {
            status if status.is_success() => {
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await.map_err(|e| network_error(self.name(), &e))?;
                let mut result = FetchResult::new(bytes.to_vec(), self.name());
                if let Some(content_type) = content_type {
                    result = result.with_content_type(content_type);
                }
                Ok(result)
            }
            reqwest::StatusCode::NOT_FOUND => Err(CodexError::NotFound {
                uri: reference.reference.original_uri().to_string(),
                providers: vec![self.name().to_string()],
            }),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Err(CodexError::Auth {
                provider: self.name().to_string(),
                message: format!("status {}", response.status()),
            }),
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(CodexError::RateLimited {
                provider: self.name().to_string(),
                retry_after: response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(std::time::Duration::from_secs),
            }),
            status => Err(CodexError::Network {
                provider: self.name().to_string(),
                message: format!("unexpected status {status}"),
            }),
        }
    }

    #[instrument(skip(self, options), fields(provider = "github"))]
    async fn exists(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<bool> {
        match self.fetch(reference, options).await {
            Ok(_) => Ok(true),
            Err(CodexError::NotFound { .. }) => Ok(false),
            Err(_) => Ok(false),
        }
    }
}

fn network_error(provider: &str, source: &reqwest::Error) -> CodexError {
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
    fn can_handle_only_remote_references() {
        let provider = GithubProvider::new("acme", "docs-repo", "main");
        assert!(provider.can_handle(&resolved("readme.md")));
    }

    #[test]
    fn raw_url_includes_branch_and_path() {
        let provider = GithubProvider::new("acme", "docs-repo", "main").with_api_base("https://api.example.test");
        let url = provider.raw_url(&resolved("nested/readme.md"), "release");
        assert!(url.contains("acme/docs-repo"));
        assert!(url.contains("nested/readme.md"));
        assert!(url.contains("ref=release"));
    }

    #[test]
    fn resolve_token_prefers_options_over_env() {
        let provider = GithubProvider::new("acme", "docs-repo", "main");
        let options = FetchOptions {
            token: Some("explicit-token".into()),
            ..Default::default()
        };
        assert_eq!(provider.resolve_token(&options).as_deref(), Some("explicit-token"));
    }
}
