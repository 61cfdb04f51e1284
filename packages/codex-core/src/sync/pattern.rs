//! Glob matching for sync include/exclude patterns, plus the
//! project-name wildcard matcher used for frontmatter-driven routing.

use globset::{Glob, GlobMatcher};

/// Compile a sync glob pattern (`**`, `*`, `?`, `[...]`, `{a,b}`).
/// Invalid patterns never match anything rather than panicking — a typo
/// in a config file should not take a sync down.
pub fn compile(pattern: &str) -> Option<GlobMatcher> {
    Glob::new(pattern).ok().map(|glob| glob.compile_matcher())
}

/// Does any pattern in `patterns` match `path`?
pub fn any_matches(patterns: &[String], path: &str) -> bool {
    patterns.iter().filter_map(|p| compile(p)).any(|matcher| matcher.is_match(path))
}

/// Project-name wildcard matching for `codex_sync_include`/`exclude`:
/// `*` matches any project, `*-suffix` and `prefix-*` match by affix,
/// and a bare name matches exactly.
pub fn project_name_matches(pattern: &str, project: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return project.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return project.starts_with(prefix);
    }
    pattern == project
}

pub fn any_project_matches(patterns: &[String], project: &str) -> bool {
    patterns.iter().any(|p| project_name_matches(p, project))
}
