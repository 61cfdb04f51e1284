//! Storage manager (component C): priority-ordered provider dispatch.

use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{CodexError, Result};
use crate::provider::{FetchOptions, FetchResult, StorageProvider};
use crate::reference::ResolvedReference;

/// Holds a priority-ordered list of providers and dispatches `fetch`/
/// `exists` across them. Default order: local, file-plugin, github, http,
/// s3-archive; callers construct the manager with whatever order their
/// configuration specifies.
pub struct StorageManager {
    providers: Vec<Box<dyn StorageProvider>>,
}

impl StorageManager {
    pub fn new(providers: Vec<Box<dyn StorageProvider>>) -> Self {
        Self { providers }
    }

    /// Resolve auth/transport options from configuration for a given
    /// reference. Providers that don't need a field ignore it.
    pub fn resolve_options(config: &Config, branch_override: Option<String>) -> FetchOptions {
        let provider_config = config.storage.first();
        let token = provider_config
            .and_then(|p| p.token_env.as_ref())
            .and_then(|env_var| std::env::var(env_var).ok());
        let branch = branch_override.or_else(|| provider_config.and_then(|p| p.branch.clone()));

        FetchOptions::builder()
            .maybe_token(token)
            .headers(provider_config.map(|p| p.headers.clone()).unwrap_or_default())
            .maybe_branch(branch)
            .timeout(std::time::Duration::from_secs(30))
            .maybe_max_size(provider_config.and_then(|p| p.max_size))
            .build()
    }

    /// Walk providers in priority order. Skip any whose `can_handle` is
    /// false. For the first whose `can_handle` is true, attempt `fetch`;
    /// on success, return. On any error other than `NotFound`, try the
    /// next provider, accumulating errors. If every provider either
    /// refused or failed, raise `AllProvidersFailed`; if none could
    /// handle the reference at all, raise `NoProvider`.
    #[instrument(skip_all, fields(uri = reference.reference.original_uri()))]
    pub async fn fetch(&self, reference: &ResolvedReference, options: &FetchOptions) -> Result<FetchResult> {
        let mut handled_any = false;
        let mut causes = Vec::new();

        for provider in &self.providers {
            if !provider.can_handle(reference) {
                continue;
            }
            handled_any = true;

            match provider.fetch(reference, options).await {
                Ok(result) => {
                    if !causes.is_empty() {
                        debug!(provider = provider.name(), prior_failures = causes.len(), "provider succeeded after earlier failures");
                    }
                    return Ok(result);
                }
                Err(CodexError::NotFound { .. }) => {
                    causes.push((provider.name().to_string(), "not found".to_string()));
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    causes.push((provider.name().to_string(), e.to_string()));
                }
            }
        }

        if !handled_any {
            return Err(CodexError::NoProvider {
                uri: reference.reference.original_uri().to_string(),
            });
        }

        if causes.iter().all(|(_, message)| message == "not found") {
            return Err(CodexError::NotFound {
                uri: reference.reference.original_uri().to_string(),
                providers: causes.into_iter().map(|(name, _)| name).collect(),
            });
        }

        Err(CodexError::AllProvidersFailed {
            uri: reference.reference.original_uri().to_string(),
            causes,
        })
    }

    /// Return true on the first provider that can handle and reports
    /// existence. Provider errors are swallowed (an error is not
    /// existence).
    #[instrument(skip_all, fields(uri = reference.reference.original_uri()))]
    pub async fn exists(&self, reference: &ResolvedReference, options: &FetchOptions) -> bool {
        for provider in &self.providers {
            if !provider.can_handle(reference) {
                continue;
            }
            if let Ok(true) = provider.exists(reference, options).await {
                return true;
            }
        }
        false
    }
}
