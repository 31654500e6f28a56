//! Release and branch discovery.
//!
//! Everything here is best-effort: the wizard must keep working with no
//! network access at all, so discovery failures yield empty results and the
//! caller falls back to free-text entry with a hardcoded default.

use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use erpwiz_core_domain::{
    frappe_branch, CommunityApp, ReleaseVersion, MIN_SUPPORTED_MAJOR, OPTIONAL_APPS,
};
use regex::Regex;
use serde::Deserialize;

const TAGS_URL: &str = "https://api.github.com/repos/frappe/erpnext/tags";
const AWESOME_FRAPPE_URL: &str = "https://github.com/gavindsouza/awesome-frappe.git";
const PER_PAGE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Branch names tried after the version-matching branch, in order. A
/// heuristic with no correctness guarantee for repositories with
/// unconventional branch naming; documented best-effort behavior.
const FALLBACK_BRANCHES: [&str; 3] = ["main", "master", "develop"];

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Fetch stable ERPNext versions (v14+) from the GitHub tags API, newest
/// first. Returns an empty list on any network or parse failure.
pub fn fetch_versions() -> Vec<String> {
    fetch_versions_from(TAGS_URL)
}

pub fn fetch_versions_from(tags_url: &str) -> Vec<String> {
    let client = match reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent("erpwiz")
        .build()
    {
        Ok(client) => client,
        Err(_) => return Vec::new(),
    };

    let mut names = Vec::new();
    let mut page = 1;
    loop {
        let url = format!("{tags_url}?per_page={PER_PAGE}&page={page}");
        let response = client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .send();
        let tags: Vec<Tag> = match response.and_then(|r| r.error_for_status()) {
            Ok(resp) => match resp.json() {
                Ok(tags) => tags,
                Err(_) => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };
        if tags.is_empty() {
            break;
        }
        let page_len = tags.len();
        names.extend(tags.into_iter().map(|t| t.name));
        if page_len < PER_PAGE {
            break;
        }
        page += 1;
    }

    sort_stable_versions(names)
}

/// Keep strict `vX.Y.Z` tags at or above the minimum supported major and
/// sort them numerically, newest first.
pub fn sort_stable_versions(tags: Vec<String>) -> Vec<String> {
    let mut versions: Vec<(ReleaseVersion, String)> = tags
        .into_iter()
        .filter_map(|name| {
            let parsed = ReleaseVersion::parse(&name)?;
            (parsed.major >= MIN_SUPPORTED_MAJOR).then_some((parsed, name))
        })
        .collect();
    versions.sort_by(|a, b| b.0.cmp(&a.0));
    versions.into_iter().map(|(_, name)| name).collect()
}

fn branch_exists(repo_url: &str, branch: &str) -> bool {
    let output = Command::new("git")
        .args(["ls-remote", "--heads", repo_url, branch])
        .output();
    match output {
        Ok(out) => out.status.success() && !out.stdout.is_empty(),
        Err(_) => false,
    }
}

/// Find the best branch of `repo_url` for the given ERPNext version:
/// `version-N` if it exists, then the common fallback names in order.
pub fn detect_best_branch(repo_url: &str, erpnext_version: &str) -> Option<String> {
    let version_branch = frappe_branch(erpnext_version);
    let mut candidates = vec![version_branch.as_str()];
    candidates.extend(FALLBACK_BRANCHES);
    candidates
        .into_iter()
        .find(|candidate| branch_exists(repo_url, candidate))
        .map(|branch| branch.to_string())
}

fn github_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[([^\]]+)\]\((https://github\.com/[^/]+/[^/)#?]+)\)").expect("link regex")
    })
}

/// Repositories that are never installable apps.
fn excluded_repos() -> HashSet<&'static str> {
    let mut excluded: HashSet<&'static str> =
        OPTIONAL_APPS.iter().map(|(repo, _)| *repo).collect();
    excluded.extend(["frappe", "erpnext", "bench", "frappe_docker"]);
    excluded
}

/// Parse awesome-frappe README content into (display name, repo url) pairs,
/// dropping duplicates and non-app repositories.
pub fn parse_community_index(readme: &str) -> Vec<(String, String)> {
    let excluded = excluded_repos();
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for caps in github_link_re().captures_iter(readme) {
        let display_name = caps[1].to_string();
        let url = caps[2].trim_end_matches('/').to_string();
        let repo_name = erpwiz_core_domain::repo_name_from_url(&url);
        let parts: Vec<&str> = url.rsplit('/').collect();
        let org_repo = format!("{}/{}", parts.get(1).unwrap_or(&""), repo_name);
        if excluded.contains(repo_name.as_str()) || !seen.insert(org_repo) {
            continue;
        }
        entries.push((display_name, url));
    }
    entries
}

/// Discover community apps compatible with the given ERPNext version.
///
/// Shallow-clones the awesome-frappe index, extracts GitHub links from its
/// README and keeps the repositories for which a compatible branch can be
/// detected. Returns an empty list on any failure.
pub fn fetch_community_apps(erpnext_version: &str) -> Vec<CommunityApp> {
    let tmpdir = std::env::temp_dir().join(format!("awesome-frappe-{}", std::process::id()));
    let result = clone_and_scan(&tmpdir, erpnext_version);
    let _ = std::fs::remove_dir_all(&tmpdir);
    result
}

fn clone_and_scan(tmpdir: &Path, erpnext_version: &str) -> Vec<CommunityApp> {
    let status = Command::new("git")
        .args(["clone", "--depth", "1", "--quiet", AWESOME_FRAPPE_URL])
        .arg(tmpdir)
        .status();
    if !matches!(status, Ok(s) if s.success()) {
        return Vec::new();
    }

    let readme = match std::fs::read_to_string(tmpdir.join("README.md")) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };

    parse_community_index(&readme)
        .into_iter()
        .filter_map(|(display_name, url)| {
            let repo_url = if url.ends_with(".git") {
                url.clone()
            } else {
                format!("{url}.git")
            };
            let branch = detect_best_branch(&repo_url, erpnext_version)?;
            Some(CommunityApp {
                display_name,
                repo_name: erpwiz_core_domain::repo_name_from_url(&url),
                repo_url,
                branch,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_newest_first_and_drops_prereleases() {
        let tags = vec![
            "v15.2.0".to_string(),
            "v16.0.0-beta.1".to_string(),
            "v16.7.3".to_string(),
            "v13.9.9".to_string(),
            "v16.7.10".to_string(),
            "nightly".to_string(),
        ];
        assert_eq!(
            sort_stable_versions(tags),
            vec!["v16.7.10", "v16.7.3", "v15.2.0"]
        );
    }

    #[test]
    fn sorting_is_idempotent_so_callers_need_not_resort() {
        let tags = vec![
            "v15.2.0".to_string(),
            "v16.1.0".to_string(),
            "v16.0.1".to_string(),
        ];
        let sorted = sort_stable_versions(tags);
        assert_eq!(sorted, vec!["v16.1.0", "v16.0.1", "v15.2.0"]);
        assert_eq!(sort_stable_versions(sorted.clone()), sorted);
    }

    #[test]
    fn network_failure_yields_empty_list() {
        // Nothing listens here; the request fails fast and must not panic.
        let versions = fetch_versions_from("http://127.0.0.1:1/tags");
        assert!(versions.is_empty());
    }

    #[test]
    fn parses_community_index_links() {
        let readme = "\
# Awesome Frappe\n\
- [Raven](https://github.com/The-Commit-Company/raven) chat\n\
- [HRMS](https://github.com/frappe/hrms) official, excluded\n\
- [ERPNext](https://github.com/frappe/erpnext) excluded\n\
- [Raven again](https://github.com/The-Commit-Company/raven) duplicate\n\
- [Docs](https://example.com/not-github) ignored\n";
        let entries = parse_community_index(readme);
        assert_eq!(
            entries,
            vec![(
                "Raven".to_string(),
                "https://github.com/The-Commit-Company/raven".to_string()
            )]
        );
    }

    #[test]
    fn missing_repo_has_no_branch() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("does-not-exist");
        assert_eq!(
            detect_best_branch(bogus.to_str().unwrap(), "v16.7.3"),
            None
        );
    }
}
