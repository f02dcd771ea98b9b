//! Label-heuristic provenance extraction.
//!
//! Images built by different pipelines record their provenance under
//! different label keys; these heuristics walk an ordered candidate list per
//! field and validate each hit before accepting it. A heuristic that matches
//! nothing leaves its field empty. Nothing in here fails.

use crate::types::ImageInfo;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Label keys that may carry a version string, most specific first.
const VERSION_KEYS: &[&str] = &[
    "version",
    "io.openshift.tags",
    "io.k8s.display-name",
    "summary",
    "name",
];

/// Label keys that may carry a git commit, most specific first.
const COMMIT_KEYS: &[&str] = &[
    "io.openshift.build.commit.id",
    "vcs-ref",
    "io.openshift.build.commit",
    "git.commit",
    "commit",
];

/// Label keys that may carry a source repository URL, most specific first.
const URL_KEYS: &[&str] = &[
    "io.openshift.build.source-location",
    "vcs-url",
    "io.openshift.build.source",
    "git.url",
    "source",
];

/// Label keys that may carry a build name a PR number hides in.
const PR_KEYS: &[&str] = &["io.openshift.build.name", "build.name", "name"];

lazy_static! {
    static ref VERSION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"v?(\d+\.\d+\.\d+)").unwrap(),
        Regex::new(r"v?(\d+\.\d+)").unwrap(),
        Regex::new(r"(\d+\.\d+\.\d+-\w+)").unwrap(),
        Regex::new(r"(\d+\.\d+\.\d+\.\d+)").unwrap(),
    ];
    static ref COMMIT_HEX: Regex = Regex::new(r"^[a-fA-F0-9]+$").unwrap();
    static ref PR_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"pr-(\d+)").unwrap(),
        Regex::new(r"pull-(\d+)").unwrap(),
        Regex::new(r"#(\d+)").unwrap(),
        Regex::new(r"-(\d+)$").unwrap(),
    ];
    static ref GITHUB_OWNER_REPO: Regex = Regex::new(r"github\.com[:/]([^/]+/[^/]+)").unwrap();
}

/// Extracts provenance from an image's label map and creation time.
///
/// CSV fields and the commit date are not populated here; the former come
/// from the bundle contents, the latter from [`fetch_commit_date`].
pub fn extract_metadata(
    labels: &HashMap<String, String>,
    created: Option<DateTime<Utc>>,
) -> ImageInfo {
    let (pr_number, pr_title) = extract_pr_info(labels);
    ImageInfo {
        created,
        version: extract_version(labels),
        git_commit: extract_git_commit(labels),
        git_url: extract_git_url(labels),
        pr_number,
        pr_title,
        ..ImageInfo::default()
    }
}

/// The first version-shaped substring found under [`VERSION_KEYS`].
pub fn extract_version(labels: &HashMap<String, String>) -> String {
    VERSION_KEYS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find_map(|value| version_from_str(value))
        .unwrap_or_default()
}

fn version_from_str(s: &str) -> Option<String> {
    VERSION_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(s))
        .map(|captures| captures[1].to_owned())
}

/// The first label value under [`COMMIT_KEYS`] that looks like a git commit
/// hash (7 to 40 hex characters).
pub fn extract_git_commit(labels: &HashMap<String, String>) -> String {
    COMMIT_KEYS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|value| is_commit_hash(value))
        .cloned()
        .unwrap_or_default()
}

fn is_commit_hash(s: &str) -> bool {
    (7..=40).contains(&s.len()) && COMMIT_HEX.is_match(s)
}

/// The first usable source URL under [`URL_KEYS`], with a `.git` suffix
/// stripped from GitHub URLs.
pub fn extract_git_url(labels: &HashMap<String, String>) -> String {
    URL_KEYS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|value| !value.is_empty())
        .map(|value| clean_git_url(value))
        .unwrap_or_default()
}

fn clean_git_url(raw: &str) -> String {
    let url = raw.trim_end_matches(".git");
    if url.contains("github.com") {
        url.to_owned()
    } else {
        raw.to_owned()
    }
}

/// A PR number and the label value it was found in, from [`PR_KEYS`].
/// Returns `(0, "")` when nothing matches.
pub fn extract_pr_info(labels: &HashMap<String, String>) -> (u64, String) {
    PR_KEYS
        .iter()
        .filter_map(|key| labels.get(*key))
        .find_map(|value| extract_pr_number(value).map(|n| (n, value.clone())))
        .unwrap_or_default()
}

fn extract_pr_number(s: &str) -> Option<u64> {
    PR_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(s))
        .and_then(|captures| captures[1].parse().ok())
        .filter(|n| *n > 0)
}

/// `owner/repo` from a GitHub URL, in either https or scp-like ssh form.
pub fn github_owner_repo(git_url: &str) -> Option<String> {
    if !git_url.contains("github.com") {
        return None;
    }
    let url = git_url.trim_end_matches(".git");
    GITHUB_OWNER_REPO
        .captures(url)
        .map(|captures| captures[1].to_owned())
}

#[derive(serde::Deserialize)]
struct CommitResponse {
    commit: CommitDetail,
}

#[derive(serde::Deserialize)]
struct CommitDetail {
    committer: CommitSignature,
}

#[derive(serde::Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

/// Looks up when a commit was made via the GitHub API. Best-effort: any
/// failure (non-GitHub URL, network, rate limit, unknown commit) is `None`.
pub async fn fetch_commit_date(
    client: &reqwest::Client,
    git_url: &str,
    commit: &str,
) -> Option<DateTime<Utc>> {
    let owner_repo = github_owner_repo(git_url)?;
    let url = format!("https://api.github.com/repos/{}/commits/{}", owner_repo, commit);

    let response = client
        .get(&url)
        // The GitHub API rejects requests without a User-Agent.
        .header(reqwest::header::USER_AGENT, "bpfman-catalog")
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        debug!(%url, status = %response.status(), "Commit date lookup failed");
        return None;
    }

    let body: CommitResponse = response.json().await.ok()?;
    body.commit.committer.date
}
