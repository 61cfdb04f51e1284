//! The error taxonomy surfaced by every public operation in this crate.
//!
//! Every fallible operation returns [`CodexError`]. Conditions the cache
//! engine can recover from locally (a missing index, a dangling content
//! file, a stale-fallback) are handled before they ever reach this type;
//! see the "Propagation" notes on each module for which failures are
//! swallowed versus surfaced.

use std::path::PathBuf;

use thiserror::Error;

/// The result type returned by all public operations in this crate.
pub type Result<T> = std::result::Result<T, CodexError>;

/// The taxonomy of errors this crate can surface to a caller.
#[derive(Debug, Error)]
pub enum CodexError {
    #[error("invalid codex uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("no provider configured could handle `{uri}`")]
    NoProvider { uri: String },

    #[error("not found: {uri} (checked {providers:?})")]
    NotFound { uri: String, providers: Vec<String> },

    #[error("authentication failed for provider `{provider}`: {message}")]
    Auth { provider: String, message: String },

    #[error("rate limited by provider `{provider}`: retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("network error from provider `{provider}`: {message}")]
    Network { provider: String, message: String },

    #[error("operation `{operation}` timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: std::time::Duration,
    },

    #[error("content from `{provider}` exceeds maximum size ({size} > {max})")]
    TooLarge {
        provider: String,
        size: u64,
        max: u64,
    },

    #[error("io error at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt {what} at `{path}`: {message}")]
    Corruption {
        what: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error(
        "sync plan refused: {deletions} deletions exceeds threshold (absolute {absolute_threshold}, {percentage_threshold}%)"
    )]
    SafetyRefused {
        deletions: usize,
        absolute_threshold: usize,
        percentage_threshold: f64,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("all providers failed for `{uri}`: {}", summarize_causes(.causes))]
    AllProvidersFailed {
        uri: String,
        causes: Vec<(String, String)>,
    },
}

fn summarize_causes(causes: &[(String, String)]) -> String {
    causes
        .iter()
        .map(|(provider, message)| format!("{provider}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CodexError {
    /// The process exit code this error maps to, per the CLI adapter contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            CodexError::InvalidUri { .. }
            | CodexError::Config { .. }
            | CodexError::SafetyRefused { .. } => 1,
            CodexError::NotFound { .. }
            | CodexError::Auth { .. }
            | CodexError::RateLimited { .. }
            | CodexError::Network { .. }
            | CodexError::Timeout { .. }
            | CodexError::TooLarge { .. }
            | CodexError::NoProvider { .. }
            | CodexError::AllProvidersFailed { .. } => 2,
            CodexError::Cancelled => 3,
            CodexError::Io { .. } | CodexError::Corruption { .. } => 64,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn exit_codes_match_spec_table() {
        pretty_assert_eq!(
            CodexError::InvalidUri {
                uri: "x".into(),
                reason: "y".into()
            }
            .exit_code(),
            1
        );
        pretty_assert_eq!(
            CodexError::NotFound {
                uri: "x".into(),
                providers: vec![]
            }
            .exit_code(),
            2
        );
        pretty_assert_eq!(CodexError::Cancelled.exit_code(), 3);
        pretty_assert_eq!(
            CodexError::Io {
                path: "x".into(),
                source: std::io::Error::other("boom"),
            }
            .exit_code(),
            64
        );
    }

    #[test]
    fn all_providers_failed_message_lists_each_cause() {
        let err = CodexError::AllProvidersFailed {
            uri: "codex://acme/docs/readme.md".into(),
            causes: vec![
                ("github".into(), "network timeout".into()),
                ("http".into(), "404".into()),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("github: network timeout"));
        assert!(message.contains("http: 404"));
    }
}
