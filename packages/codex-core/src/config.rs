//! Unified configuration model, mirroring the YAML schema in spec.md §6.
//!
//! Loading (finding the file on disk) is provided here for testability, but
//! remains a thin convenience — the adapter (CLI/MCP) is expected to own the
//! actual search-path policy in production; this crate just implements the
//! documented fallback order so the core is independently runnable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CodexError, Result};

fn default_cache_dir() -> String {
    ".fractary/codex/cache".to_string()
}
fn default_ttl() -> u64 {
    86_400
}
fn default_max_memory_entries() -> usize {
    100
}
fn default_max_memory_size() -> u64 {
    50 * 1024 * 1024
}
fn default_stale_window() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_deletion_absolute() -> usize {
    50
}
fn default_deletion_percentage() -> f64 {
    20.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl", rename = "defaultTtl")]
    pub default_ttl: u64,
    #[serde(default = "default_max_memory_entries", rename = "maxMemoryEntries")]
    pub max_memory_entries: usize,
    #[serde(default = "default_max_memory_size", rename = "maxMemorySize")]
    pub max_memory_size: u64,
    #[serde(default = "default_stale_window", rename = "staleWindow")]
    pub stale_window: u64,
    #[serde(default = "default_true", rename = "fallbackToStale")]
    pub fallback_to_stale: bool,
    #[serde(default, rename = "offlineMode")]
    pub offline_mode: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            max_memory_entries: default_max_memory_entries(),
            max_memory_size: default_max_memory_size(),
            stale_window: default_stale_window(),
            fallback_to_stale: true,
            offline_mode: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub max_size: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ArchiveProjectConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncDirectionConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_true", rename = "use_frontmatter")]
    pub use_frontmatter: bool,
    #[serde(default = "default_true")]
    pub prevent_self_sync: bool,
    #[serde(default)]
    pub prevent_codex_sync: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            use_frontmatter: true,
            prevent_self_sync: true,
            prevent_codex_sync: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionThreshold {
    #[serde(default = "default_deletion_absolute")]
    pub absolute: usize,
    #[serde(default = "default_deletion_percentage")]
    pub percentage: f64,
}

impl Default for DeletionThreshold {
    fn default() -> Self {
        Self {
            absolute: default_deletion_absolute(),
            percentage: default_deletion_percentage(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default, rename = "to_codex")]
    pub to_codex: SyncDirectionConfig,
    #[serde(default, rename = "from_codex")]
    pub from_codex: SyncDirectionConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default, rename = "deletionThreshold")]
    pub deletion_threshold: DeletionThreshold,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(rename = "local.base_path")]
    pub local_base_path: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: Vec<ProviderConfig>,
    #[serde(default)]
    pub archive_projects: HashMap<String, ArchiveProjectConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub file_sources: HashMap<String, FileSource>,
}

impl Config {
    /// Load configuration from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CodexError::io(path, e))?;
        let mut config: Config = serde_yaml_ng::from_str(&content).map_err(|e| CodexError::Config {
            message: format!("failed to parse {}: {e}", path.display()),
        })?;

        // `file.sources.{name}` is a separate top-level nesting from the
        // rest of the `codex.*` keys, so it's extracted from the raw
        // document rather than flattened onto `Config` directly.
        if let Ok(raw) = serde_yaml_ng::from_str::<serde_yaml_ng::Value>(&content) {
            if let Some(sources) = raw
                .get("file")
                .and_then(|f| f.get("sources"))
                .and_then(|s| s.as_mapping())
            {
                for (key, value) in sources {
                    let Some(name) = key.as_str() else { continue };
                    if let Ok(source) = serde_yaml_ng::from_value::<FileSource>(value.clone()) {
                        config.file_sources.insert(name.to_string(), source);
                    }
                }
            }
        }

        expand_env_in_config(&mut config);
        Ok(config)
    }

    /// Search, in order: `CODEX_CONFIG_PATH`, then project-relative
    /// `.fractary/config.yaml`, then a user-home fallback. Returns
    /// `Config::default()` if none exist (environment-only operation is
    /// not an error per spec.md §6).
    pub fn load_default(project_root: &Path) -> Result<Self> {
        if let Ok(path) = std::env::var("CODEX_CONFIG_PATH") {
            return Self::load_from_path(Path::new(&path));
        }

        let project_relative = project_root.join(".fractary").join("config.yaml");
        if project_relative.is_file() {
            return Self::load_from_path(&project_relative);
        }

        if let Some(home) = dirs_home() {
            let home_config = home.join(".fractary").join("config.yaml");
            if home_config.is_file() {
                return Self::load_from_path(&home_config);
            }
        }

        Ok(Config::default())
    }

    pub fn cache_dir_path(&self, project_root: &Path) -> PathBuf {
        let expanded = expand_env(&self.cache_dir);
        let path = PathBuf::from(&expanded);
        if path.is_absolute() {
            path
        } else {
            project_root.join(path)
        }
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Expand `${VAR}` and `${VAR:-default}` references against the process
/// environment. Unknown variables with no default expand to an empty
/// string, matching common shell-parameter-expansion behavior.
pub fn expand_env(input: &str) -> String {
    static PATTERN: lazy_regex::Lazy<lazy_regex::Regex> =
        lazy_regex::lazy_regex!(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}");

    PATTERN
        .replace_all(input, |caps: &lazy_regex::Captures| {
            let var = &caps[1];
            let default = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

fn expand_env_in_config(config: &mut Config) {
    config.organization = expand_env(&config.organization);
    config.project = expand_env(&config.project);
    config.cache_dir = expand_env(&config.cache_dir);
    for provider in &mut config.storage {
        if let Some(base_path) = &provider.base_path {
            provider.base_path = Some(expand_env(base_path));
        }
        if let Some(base_url) = &provider.base_url {
            provider.base_url = Some(expand_env(base_url));
        }
    }
    for source in config.file_sources.values_mut() {
        source.local_base_path = expand_env(&source.local_base_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        pretty_assert_eq!(config.cache_dir, ".fractary/codex/cache");
        pretty_assert_eq!(config.cache.default_ttl, 86_400);
        pretty_assert_eq!(config.cache.stale_window, 300);
        pretty_assert_eq!(config.cache.max_memory_entries, 100);
        pretty_assert_eq!(config.cache.max_memory_size, 50 * 1024 * 1024);
        assert!(config.cache.fallback_to_stale);
        assert!(!config.cache.offline_mode);
        pretty_assert_eq!(config.sync.deletion_threshold.absolute, 50);
        pretty_assert_eq!(config.sync.deletion_threshold.percentage, 20.0);
    }

    #[test]
    fn expand_env_substitutes_set_variable() {
        unsafe {
            std::env::set_var("CODEX_TEST_VAR", "value");
        }
        pretty_assert_eq!(expand_env("prefix-${CODEX_TEST_VAR}-suffix"), "prefix-value-suffix");
        unsafe {
            std::env::remove_var("CODEX_TEST_VAR");
        }
    }

    #[test]
    fn expand_env_uses_default_when_unset() {
        pretty_assert_eq!(
            expand_env("${CODEX_DEFINITELY_UNSET:-fallback}"),
            "fallback"
        );
    }

    #[test]
    fn expand_env_empty_when_unset_and_no_default() {
        pretty_assert_eq!(expand_env("${CODEX_DEFINITELY_UNSET_2}"), "");
    }

    #[test]
    fn parse_full_yaml_document() {
        let yaml = r#"
organization: acme
project: docs
cacheDir: .fractary/codex/cache
cache:
  defaultTtl: 3600
  staleWindow: 120
storage:
  - type: local
    base_path: /srv/codex
sync:
  to_codex:
    include: ["**/*.md"]
    exclude: ["**/*.draft.md"]
  routing:
    use_frontmatter: true
    prevent_self_sync: true
file:
  sources:
    specs:
      type: local
      local.base_path: .fractary/specs
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        let config = Config::load_from_path(&path).unwrap();
        pretty_assert_eq!(config.organization, "acme");
        pretty_assert_eq!(config.cache.default_ttl, 3600);
        pretty_assert_eq!(config.sync.to_codex.include, vec!["**/*.md".to_string()]);
        pretty_assert_eq!(
            config.file_sources.get("specs").map(|s| s.local_base_path.clone()),
            Some(".fractary/specs".to_string())
        );
    }

    #[test]
    fn load_default_falls_back_when_nothing_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_default(dir.path()).unwrap();
        pretty_assert_eq!(config.cache_dir, ".fractary/codex/cache");
    }
}
