//! The analysis result model.
//!
//! These types are assembled by the orchestrator and serialised as-is for
//! the JSON output; the field names here are the output format.

use chrono::{DateTime, Utc};
use oci_inspect::ImageRef;
use serde::Serialize;

/// Where an image was found. Classification records where a lookup actually
/// succeeded, never a guess from the reference string alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    /// The downstream production registry.
    Downstream,
    /// A Konflux tenant workspace on quay.io.
    Tenant,
    /// Not found anywhere the analyser looked.
    Inaccessible,
}

/// Build provenance extracted from an image's labels and manifest.
///
/// Every field is best-effort; a heuristic that matches nothing leaves its
/// field empty, which the JSON output then omits.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageInfo {
    /// When the image was created, from its config.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// The semantic version found in the labels.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// The version declared by the bundle's ClusterServiceVersion.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub csv_version: String,
    /// The `createdAt` annotation of the ClusterServiceVersion.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub csv_created_at: String,
    /// The git commit the image was built from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub git_commit: String,
    /// The source repository URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub git_url: String,
    /// When the commit was made, looked up from the forge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_date: Option<DateTime<Utc>>,
    /// The pull request number inferred from build labels.
    #[serde(skip_serializing_if = "is_zero")]
    pub pr_number: u64,
    /// The label value the pull request number was inferred from.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pr_title: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// The outcome of inspecting one declared image. An unreachable image is a
/// result with `accessible: false` and an error string, not a failure of the
/// analysis.
#[derive(Debug, Clone, Serialize)]
pub struct ImageResult {
    /// The reference exactly as the bundle declared it.
    pub reference: String,
    /// Whether any lookup for this image succeeded.
    pub accessible: bool,
    /// Where the successful lookup happened.
    pub registry: RegistryType,
    /// The tenant workspace reference the image was actually found under,
    /// when the declared reference itself was not reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_ref: Option<String>,
    /// Extracted provenance, when the image was reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ImageInfo>,
    /// Why the image is inaccessible.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Aggregate tallies over all image results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// How many images the bundle declared.
    pub total_images: usize,
    /// How many of them were reachable.
    pub accessible_images: usize,
    /// How many were found in the downstream registry.
    pub downstream_images: usize,
    /// How many were found in a tenant workspace.
    pub tenant_images: usize,
    /// How many were reachable nowhere.
    pub inaccessible_images: usize,
}

impl Summary {
    /// Tally a set of image results.
    pub fn from_results(results: &[ImageResult]) -> Self {
        let mut summary = Summary {
            total_images: results.len(),
            ..Summary::default()
        };

        for result in results {
            if result.accessible {
                summary.accessible_images += 1;
                match result.registry {
                    RegistryType::Downstream => summary.downstream_images += 1,
                    RegistryType::Tenant => summary.tenant_images += 1,
                    RegistryType::Inaccessible => (),
                }
            } else {
                summary.inaccessible_images += 1;
            }
        }

        summary
    }
}

/// The complete analysis of one bundle image.
#[derive(Debug, Clone, Serialize)]
pub struct BundleAnalysis {
    /// The analysed bundle, digest-pinned.
    pub bundle_ref: ImageRef,
    /// The bundle image's own provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_info: Option<ImageInfo>,
    /// One result per declared image, in extraction order.
    pub images: Vec<ImageResult>,
    /// Aggregate tallies over `images`.
    pub summary: Summary,
}
