//! Listing recent bundle builds in a repository.
//!
//! CI pushes each bundle build under its full 40-character git commit SHA as
//! the tag, so the recent-build list is: every commit-shaped tag, its
//! metadata fetched concurrently, sorted newest-first by the `build-date`
//! label.

use crate::error::AnalysisError;
use crate::fetch;
use crate::inspect::ImageInspector;
use chrono::{DateTime, Utc};
use oci_inspect::ImageRef;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The full length of a git commit SHA.
const GIT_COMMIT_TAG_LENGTH: usize = 40;

/// How many tag lookups run at once.
const LIST_CONCURRENCY: usize = 10;

/// What the lister reports about one bundle build.
#[derive(Debug, Clone, Serialize)]
pub struct BundleMetadata {
    /// The full tagged reference.
    pub image: String,
    /// The commit tag itself.
    pub tag: String,
    /// The manifest digest the tag points at.
    pub digest: String,
    /// The image's `build-date` label, verbatim.
    pub build_date: String,
    /// The image's `version` label.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// When the image was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Whether a tag is a full git commit SHA (40 lowercase hex characters).
pub fn is_git_commit_tag(tag: &str) -> bool {
    tag.len() == GIT_COMMIT_TAG_LENGTH
        && tag
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Lists the `limit` most recent bundle builds in `repo`'s repository.
///
/// An individual tag whose metadata cannot be fetched, or that carries no
/// `build-date` label, is skipped; the call fails only when cancellation
/// hits, when the repository has no commit tags at all, or when every tag
/// lookup failed.
pub async fn list_latest_bundles(
    inspector: Arc<dyn ImageInspector>,
    repo: &ImageRef,
    limit: usize,
    cancel: CancellationToken,
) -> Result<Vec<BundleMetadata>, AnalysisError> {
    info!(%repo, "Listing bundle tags");
    let tags = inspector.list_tags(repo).await?;
    let commit_tags: Vec<String> = tags.into_iter().filter(|t| is_git_commit_tag(t)).collect();
    if commit_tags.is_empty() {
        return Err(AnalysisError::Inspection {
            reference: repo.whole(),
            message: "repository has no git commit tags".to_owned(),
        });
    }
    debug!(count = commit_tags.len(), "Fetching metadata for commit tags");

    let worker = {
        let inspector = Arc::clone(&inspector);
        let repo = repo.clone();
        move |tag: String| {
            let inspector = Arc::clone(&inspector);
            let repo = repo.clone();
            async move {
                let tagged = ImageRef::from_parts(
                    repo.registry(),
                    repo.repository(),
                    Some(&tag),
                    None,
                );
                let info = inspector.inspect(&tagged).await?;
                let build_date = info.labels.get("build-date").cloned().unwrap_or_default();
                if build_date.is_empty() {
                    return Err(AnalysisError::Inspection {
                        reference: tagged.whole(),
                        message: "no build-date label".to_owned(),
                    });
                }
                Ok(BundleMetadata {
                    image: tagged.whole(),
                    tag,
                    digest: info.digest,
                    build_date,
                    version: info.labels.get("version").cloned().unwrap_or_default(),
                    created: info.created,
                })
            }
        }
    };

    let fetched = fetch::fetch_all(commit_tags, LIST_CONCURRENCY, cancel, worker).await?;
    let mut bundles: Vec<BundleMetadata> =
        fetched.into_iter().map(|(_, bundle)| bundle).collect();
    if bundles.is_empty() {
        return Err(AnalysisError::Inspection {
            reference: repo.whole(),
            message: "no bundles with metadata found".to_owned(),
        });
    }

    // build-date labels are RFC 3339, so a string sort is a time sort.
    bundles.sort_by(|a, b| b.build_date.cmp(&a.build_date));
    bundles.truncate(limit);
    Ok(bundles)
}
