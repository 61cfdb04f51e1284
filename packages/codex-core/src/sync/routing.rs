//! Routing-aware filtering for `from-codex` syncs: which codex-tree
//! files are eligible for a given target project, per frontmatter and
//! directional include/exclude configuration.

use crate::config::RoutingConfig;

use super::frontmatter::Metadata;
use super::pattern::{any_matches, any_project_matches};

/// Split a codex-tree-relative path into its owning project, per the
/// `projects/{project}/{subpath}` layout. Root-level files (no
/// `projects/` prefix) have no owning project and are never routed.
pub fn source_project(path: &str) -> Option<&str> {
    path.strip_prefix("projects/").and_then(|rest| rest.split('/').next()).filter(|p| !p.is_empty())
}

/// Expand `{org}`/`{project}`/`{codex_repo}` placeholders in a
/// `from_codex.include` pattern.
fn expand_placeholders(pattern: &str, org: &str, project: &str, codex_repo: &str) -> String {
    pattern
        .replace("{org}", org)
        .replace("{project}", project)
        .replace("{codex_repo}", codex_repo)
}

/// Evaluate one `from_codex.include` pattern against a codex-tree path,
/// supporting the three syntactic forms from spec §4.E:
/// 1. `codex://{org}/{project}/{subpath}` — expanded then matched
///    against `projects/{project}/{subpath}`.
/// 2. `projects/{project}/{subpath}` — matched literally.
/// 3. A bare path — project-prefixed if its first segment contains a
///    `.`, otherwise a path within the target project.
pub fn from_codex_include_matches(pattern: &str, codex_path: &str, org: &str, target_project: &str, codex_repo: &str) -> bool {
    let expanded = expand_placeholders(pattern, org, target_project, codex_repo);

    if let Some(rest) = expanded.strip_prefix("codex://") {
        let mut parts = rest.splitn(3, '/');
        let _org = parts.next().unwrap_or_default();
        let project = parts.next().unwrap_or_default();
        let subpath = parts.next().unwrap_or_default();
        let literal = format!("projects/{project}/{subpath}");
        return any_matches(&[literal], codex_path);
    }

    if expanded.starts_with("projects/") {
        return any_matches(&[expanded], codex_path);
    }

    let first_segment = expanded.split('/').next().unwrap_or_default();
    if first_segment.contains('.') {
        any_matches(&[expanded], codex_path)
    } else {
        let scoped = format!("projects/{target_project}/{expanded}");
        any_matches(&[scoped], codex_path)
    }
}

/// Decide whether a codex-tree file at `codex_path` should be routed to
/// `target_project`.
///
/// Exclude takes precedence over include, at both the directional-config
/// and frontmatter levels. If `routing.use_frontmatter` is false, only
/// the directional `include`/`exclude` patterns apply.
#[allow(clippy::too_many_arguments)]
pub fn is_routed(
    metadata: &Metadata,
    codex_path: &str,
    source_project: Option<&str>,
    target_project: &str,
    org: &str,
    codex_repo_name: &str,
    routing: &RoutingConfig,
    directional_include: &[String],
    directional_exclude: &[String],
) -> bool {
    if let Some(source) = source_project {
        if routing.prevent_self_sync && source == target_project {
            return false;
        }
        if routing.prevent_codex_sync && source == codex_repo_name {
            return false;
        }
    }

    if any_matches(directional_exclude, codex_path) {
        return false;
    }
    if !directional_include.is_empty()
        && !directional_include
            .iter()
            .any(|pattern| from_codex_include_matches(pattern, codex_path, org, target_project, codex_repo_name))
    {
        return false;
    }

    if routing.use_frontmatter {
        let excluded = any_project_matches(&metadata.codex_sync_exclude, target_project);
        if excluded {
            return false;
        }
        let included = any_project_matches(&metadata.codex_sync_include, target_project);
        if !included {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq as pretty_assert_eq;

    #[test]
    fn source_project_splits_after_projects_prefix() {
        pretty_assert_eq!(source_project("projects/etl/spec.md"), Some("etl"));
        pretty_assert_eq!(source_project("README.md"), None);
    }

    #[test]
    fn include_matches_literal_projects_form() {
        assert!(from_codex_include_matches(
            "projects/etl/**",
            "projects/etl/spec.md",
            "acme",
            "lake-api",
            "codex"
        ));
    }

    #[test]
    fn include_matches_codex_uri_form() {
        assert!(from_codex_include_matches(
            "codex://{org}/etl/spec.md",
            "projects/etl/spec.md",
            "acme",
            "lake-api",
            "codex"
        ));
    }

    #[test]
    fn include_matches_bare_project_scoped_path() {
        assert!(from_codex_include_matches("spec.md", "projects/lake-api/spec.md", "acme", "lake-api", "codex"));
    }

    #[test]
    fn include_matches_dotted_bare_path_as_project_prefixed() {
        assert!(from_codex_include_matches(
            "etl.project/spec.md",
            "etl.project/spec.md",
            "acme",
            "lake-api",
            "codex"
        ));
    }

    #[test]
    fn routing_respects_frontmatter_include_and_exclude() {
        let routing = RoutingConfig {
            use_frontmatter: true,
            prevent_self_sync: true,
            prevent_codex_sync: false,
        };
        let included = Metadata {
            codex_sync_include: vec!["lake-*".to_string()],
            ..Default::default()
        };
        assert!(is_routed(
            &included,
            "projects/etl/spec.md",
            Some("etl"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &[],
            &[]
        ));

        let excluded = Metadata {
            codex_sync_include: vec!["*".to_string()],
            codex_sync_exclude: vec!["lake-api".to_string()],
            ..Default::default()
        };
        assert!(!is_routed(
            &excluded,
            "projects/api/notes.md",
            Some("api"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &[],
            &[]
        ));
    }

    #[test]
    fn prevent_self_sync_skips_matching_source_project() {
        let routing = RoutingConfig {
            use_frontmatter: true,
            prevent_self_sync: true,
            prevent_codex_sync: false,
        };
        let metadata = Metadata {
            codex_sync_include: vec!["*".to_string()],
            ..Default::default()
        };
        assert!(!is_routed(
            &metadata,
            "projects/lake-api/spec.md",
            Some("lake-api"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &[],
            &[]
        ));
    }

    #[test]
    fn frontmatter_ignored_when_use_frontmatter_false() {
        let routing = RoutingConfig {
            use_frontmatter: false,
            prevent_self_sync: false,
            prevent_codex_sync: false,
        };
        let metadata = Metadata {
            codex_sync_exclude: vec!["*".to_string()],
            ..Default::default()
        };
        assert!(is_routed(
            &metadata,
            "projects/etl/spec.md",
            Some("etl"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &[],
            &[]
        ));
    }

    #[test]
    fn directional_include_restricts_by_codex_path() {
        let routing = RoutingConfig {
            use_frontmatter: false,
            prevent_self_sync: false,
            prevent_codex_sync: false,
        };
        let metadata = Metadata::default();
        assert!(is_routed(
            &metadata,
            "projects/etl/spec.md",
            Some("etl"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &["projects/etl/**".to_string()],
            &[]
        ));
        assert!(!is_routed(
            &metadata,
            "projects/other/spec.md",
            Some("other"),
            "lake-api",
            "acme",
            "codex",
            &routing,
            &["projects/etl/**".to_string()],
            &[]
        ));
    }
}
