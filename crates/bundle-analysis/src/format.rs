//! Rendering analysis results and bundle listings.
//!
//! Pure functions from the result model to strings; nothing here touches a
//! registry or decides policy.

use crate::error::AnalysisError;
use crate::lister::BundleMetadata;
use crate::types::{BundleAnalysis, ImageInfo, ImageResult, RegistryType, Summary};
use serde::Serialize;
use std::fmt::Write;
use std::str::FromStr;

/// The output renderings the CLI offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable, grouped text.
    Text,
    /// Pretty-printed JSON of the result model.
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

impl FromStr for OutputFormat {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(AnalysisError::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// Renders a bundle analysis.
pub fn format_analysis(
    analysis: &BundleAnalysis,
    format: OutputFormat,
) -> Result<String, AnalysisError> {
    match format {
        OutputFormat::Json => to_json(analysis),
        OutputFormat::Text => Ok(analysis_text(analysis)),
    }
}

/// Renders a bundle listing.
pub fn format_bundles(
    bundles: &[BundleMetadata],
    format: OutputFormat,
) -> Result<String, AnalysisError> {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Listing<'a> {
                count: usize,
                bundles: &'a [BundleMetadata],
            }
            to_json(&Listing {
                count: bundles.len(),
                bundles,
            })
        }
        OutputFormat::Text => Ok(bundles_text(bundles)),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AnalysisError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AnalysisError::Extraction(anyhow::Error::new(e)))
}

fn analysis_text(analysis: &BundleAnalysis) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Bundle: {}", analysis.bundle_ref);
    if let Some(info) = &analysis.bundle_info {
        if let Some(created) = info.created {
            let _ = writeln!(out, "  Created: {}", created.to_rfc3339());
        }
        if !info.version.is_empty() {
            let _ = writeln!(out, "  Image version (label): {}", info.version);
        }
        if !info.csv_version.is_empty() {
            let _ = writeln!(out, "  ClusterServiceVersion: {}", info.csv_version);
        }
        if !info.csv_created_at.is_empty() {
            let _ = writeln!(out, "  CSV Created: {}", info.csv_created_at);
        }
        if !info.git_commit.is_empty() && !info.git_url.is_empty() {
            let _ = writeln!(out, "  Git: {}", commit_url(&info.git_url, &info.git_commit));
        }
        if info.pr_number > 0 {
            if let Some(pr) = pr_url(&info.git_url, info.pr_number) {
                let title = if info.pr_title.is_empty() {
                    format!("PR #{}", info.pr_number)
                } else {
                    info.pr_title.clone()
                };
                let _ = writeln!(out, "  PR: {} - {}", pr, title);
            }
        }
    }
    out.push('\n');

    if analysis.images.is_empty() {
        out.push_str("No images found in bundle.\n");
    } else {
        let _ = writeln!(out, "Images ({} found):\n", analysis.images.len());
        for image in &analysis.images {
            if let Some(label) = component_label(&image.reference) {
                let _ = writeln!(out, "=== {} ===", label);
            }
            out.push_str(&image_text(image));
        }
    }

    out.push_str(&summary_text(&analysis.summary));
    out
}

fn image_text(image: &ImageResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  {}", image.reference);

    if !image.accessible {
        if image.error.is_empty() {
            out.push_str("    ✗ Not accessible\n");
        } else {
            let _ = writeln!(out, "    ✗ {}", image.error);
        }
        out.push('\n');
        return out;
    }

    match image.registry {
        RegistryType::Downstream => {
            out.push_str("    ✓ Published in downstream registry (registry.redhat.io)\n");
        }
        RegistryType::Tenant => {
            out.push_str("    ⚠ Only in tenant workspace (not yet published downstream)\n");
            if let Some(tenant_ref) = &image.tenant_ref {
                let _ = writeln!(out, "    Source: {}", tenant_ref);
            }
        }
        RegistryType::Inaccessible => {
            out.push_str("    ✗ Registry status unknown\n");
        }
    }

    if let Some(info) = &image.info {
        out.push_str(&info_text(info));
    }

    out.push('\n');
    out
}

fn info_text(info: &ImageInfo) -> String {
    let mut out = String::new();
    if let Some(created) = info.created {
        let _ = writeln!(out, "    Created: {}", created.to_rfc3339());
    }
    if !info.version.is_empty() {
        let _ = writeln!(out, "    Image version (label): {}", info.version);
    }
    if !info.git_commit.is_empty() && !info.git_url.is_empty() {
        let _ = writeln!(out, "    Git: {}", commit_url(&info.git_url, &info.git_commit));
        if let Some(commit_date) = info.commit_date {
            let _ = writeln!(out, "    Commit Date: {}", commit_date.to_rfc3339());
        }
    }
    if info.pr_number > 0 {
        if let Some(pr) = pr_url(&info.git_url, info.pr_number) {
            let _ = writeln!(out, "    PR: {}", pr);
        }
    }
    out
}

fn summary_text(summary: &Summary) -> String {
    if summary.total_images == 0 {
        return "Summary: No images analysed.\n".to_owned();
    }

    let mut parts = vec![format!("{} images", summary.total_images)];
    if summary.accessible_images > 0 {
        parts.push(format!("{} accessible", summary.accessible_images));
    }
    if summary.downstream_images > 0 {
        parts.push(format!("{} downstream", summary.downstream_images));
    }
    if summary.tenant_images > 0 {
        parts.push(format!("{} tenant workspace", summary.tenant_images));
    }
    if summary.inaccessible_images > 0 {
        parts.push(format!("{} inaccessible", summary.inaccessible_images));
    }

    format!("Summary: {}\n", parts.join(", "))
}

fn bundles_text(bundles: &[BundleMetadata]) -> String {
    let mut out = String::new();
    for bundle in bundles {
        let base = bundle
            .image
            .rfind(':')
            .map(|i| &bundle.image[..i])
            .unwrap_or(&bundle.image);
        // Tags are normally full commit hashes; keep arbitrary tags intact
        // when byte 8 is not a char boundary.
        let short = bundle.tag.get(..8).unwrap_or(&bundle.tag);
        let _ = writeln!(
            out,
            "{}@{} {} g{}",
            base, bundle.digest, bundle.build_date, short
        );
    }
    out
}

/// A browsable commit URL for GitHub sources; anything else stays as
/// "url (commit: hash)".
fn commit_url(git_url: &str, commit: &str) -> String {
    if git_url.contains("github.com") {
        format!("{}/commit/{}", git_url.trim_end_matches(".git"), commit)
    } else {
        format!("{} (commit: {})", git_url, commit)
    }
}

fn pr_url(git_url: &str, pr_number: u64) -> Option<String> {
    if git_url.contains("github.com") && pr_number > 0 {
        Some(format!(
            "{}/pull/{}",
            git_url.trim_end_matches(".git"),
            pr_number
        ))
    } else {
        None
    }
}

/// A display heading for the component an image reference names, inferred
/// from the reference text.
fn component_label(reference: &str) -> Option<&'static str> {
    let lower = reference.to_lowercase();
    if lower.contains("bundle") {
        Some("Bundle Image")
    } else if lower.contains("agent") {
        Some("Bpfman Agent Image")
    } else if lower.contains("operator") {
        Some("Operator Image")
    } else if lower.contains("/bpfman@") || lower.contains("/bpfman:") {
        // The daemon image is plain "bpfman" with no suffix.
        Some("Bpfman Daemon (Rust) Image")
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use oci_inspect::ImageRef;

    fn digest() -> String {
        format!("sha256:{}", "d".repeat(64))
    }

    fn sample() -> BundleAnalysis {
        let images = vec![
            ImageResult {
                reference: "registry.redhat.io/bpfman/bpfman-operator:v0.5.4".to_owned(),
                accessible: true,
                registry: RegistryType::Downstream,
                tenant_ref: None,
                info: Some(ImageInfo {
                    version: "0.5.4".to_owned(),
                    git_commit: "deadbeefcafe".to_owned(),
                    git_url: "https://github.com/bpfman/bpfman-operator".to_owned(),
                    ..ImageInfo::default()
                }),
                error: String::new(),
            },
            ImageResult {
                reference: "registry.redhat.io/bpfman/bpfman-agent:v0.5.4".to_owned(),
                accessible: true,
                registry: RegistryType::Tenant,
                tenant_ref: Some(
                    "quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-agent-ystream:v0.5.4"
                        .to_owned(),
                ),
                info: None,
                error: String::new(),
            },
            ImageResult {
                reference: format!("registry.redhat.io/bpfman/bpfman@{}", digest()),
                accessible: false,
                registry: RegistryType::Inaccessible,
                tenant_ref: None,
                info: None,
                error: "not accessible in any registry".to_owned(),
            },
        ];
        let summary = Summary::from_results(&images);
        BundleAnalysis {
            bundle_ref: format!(
                "registry.redhat.io/bpfman/bpfman-operator-bundle@{}",
                digest()
            )
            .parse::<ImageRef>()
            .unwrap(),
            bundle_info: Some(ImageInfo {
                created: Some(Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).unwrap()),
                version: "0.5.4".to_owned(),
                csv_version: "0.5.4".to_owned(),
                ..ImageInfo::default()
            }),
            images,
            summary,
        }
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(OutputFormat::Text, "text".parse().unwrap());
        assert_eq!(OutputFormat::Text, "TEXT".parse().unwrap());
        assert_eq!(OutputFormat::Json, "json".parse().unwrap());
        assert!(matches!(
            "yaml".parse::<OutputFormat>(),
            Err(AnalysisError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn text_groups_and_summarises() {
        let text = format_analysis(&sample(), OutputFormat::Text).unwrap();
        assert!(text.starts_with("Bundle: registry.redhat.io/bpfman/bpfman-operator-bundle@"));
        assert!(text.contains("  ClusterServiceVersion: 0.5.4\n"));
        assert!(text.contains("Images (3 found):"));
        assert!(text.contains("=== Operator Image ==="));
        assert!(text.contains("=== Bpfman Agent Image ==="));
        assert!(text.contains("=== Bpfman Daemon (Rust) Image ==="));
        assert!(text.contains("✓ Published in downstream registry"));
        assert!(text.contains("⚠ Only in tenant workspace"));
        assert!(text.contains("Source: quay.io/redhat-user-workloads"));
        assert!(text.contains("✗ not accessible in any registry"));
        assert!(text.contains(
            "Git: https://github.com/bpfman/bpfman-operator/commit/deadbeefcafe"
        ));
        assert!(text.ends_with(
            "Summary: 3 images, 2 accessible, 1 downstream, 1 tenant workspace, 1 inaccessible\n"
        ));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let json = format_analysis(&sample(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(3, value["images"].as_array().unwrap().len());
        assert_eq!(3, value["summary"]["total_images"]);
        // The inaccessible image omits its empty optionals.
        assert!(value["images"][2].get("info").is_none());
    }

    #[test]
    fn empty_image_list() {
        let mut analysis = sample();
        analysis.images.clear();
        analysis.summary = Summary::from_results(&analysis.images);
        let text = format_analysis(&analysis, OutputFormat::Text).unwrap();
        assert!(text.contains("No images found in bundle."));
        assert!(text.ends_with("Summary: No images analysed.\n"));
    }

    #[test]
    fn component_labels() {
        assert_eq!(
            Some("Bundle Image"),
            component_label("quay.io/x/bpfman-operator-bundle:1")
        );
        assert_eq!(
            Some("Bpfman Daemon (Rust) Image"),
            component_label("registry.redhat.io/bpfman/bpfman:latest")
        );
        assert_eq!(None, component_label("quay.io/other/thing:1"));
    }

    #[test]
    fn commit_and_pr_urls() {
        assert_eq!(
            "https://github.com/x/y/commit/abc",
            commit_url("https://github.com/x/y.git", "abc")
        );
        assert_eq!(
            "https://example.com/x/y (commit: abc)",
            commit_url("https://example.com/x/y", "abc")
        );
        assert_eq!(
            Some("https://github.com/x/y/pull/7".to_owned()),
            pr_url("https://github.com/x/y", 7)
        );
        assert_eq!(None, pr_url("https://example.com/x/y", 7));
    }

    #[test]
    fn bundle_listing_text() {
        let bundles = vec![BundleMetadata {
            image: format!("quay.io/ns/repo:{}", "a".repeat(40)),
            tag: "a".repeat(40),
            digest: digest(),
            build_date: "2024-05-14T09:30:00Z".to_owned(),
            version: "0.5.4".to_owned(),
            created: None,
        }];
        let text = format_bundles(&bundles, OutputFormat::Text).unwrap();
        assert_eq!(
            format!(
                "quay.io/ns/repo@{} 2024-05-14T09:30:00Z gaaaaaaaa\n",
                digest()
            ),
            text
        );

        let json = format_bundles(&bundles, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(1, value["count"]);
        assert_eq!("2024-05-14T09:30:00Z", value["bundles"][0]["build_date"]);
    }

    #[test]
    fn bundle_listing_tolerates_short_and_non_ascii_tags() {
        let metadata = |tag: &str| BundleMetadata {
            image: format!("quay.io/ns/repo:{}", tag),
            tag: tag.to_owned(),
            digest: digest(),
            build_date: "2024-05-14T09:30:00Z".to_owned(),
            version: String::new(),
            created: None,
        };
        // "builds-✓✓" puts a multi-byte char across byte 8; the tag must
        // come through whole instead of panicking on the char boundary.
        let bundles = vec![metadata("v1"), metadata("builds-✓✓")];
        let text = format_bundles(&bundles, OutputFormat::Text).unwrap();
        assert!(text.contains(" gv1\n"));
        assert!(text.contains(" gbuilds-✓✓\n"));
    }
}
