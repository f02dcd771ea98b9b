//! Bundle content extraction.
//!
//! An operator bundle image is a filesystem, not a runnable image: its
//! `manifests/` directory holds the ClusterServiceVersion (CSV) and the
//! other manifests the operator ships. The declared image set is read from
//! two places:
//!
//! - `spec.relatedImages` in the CSV, the authoritative declaration; a
//!   bundle without a readable CSV fails extraction.
//! - the `bpfman-config` ConfigMap manifest, where the daemon and agent
//!   images are configured at runtime and therefore missing from
//!   `relatedImages`. Best-effort; a bundle without it just contributes
//!   nothing.

use crate::error::AnalysisError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use oci_inspect::manifest::{
    IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE, IMAGE_LAYER_GZIP_MEDIA_TYPE, IMAGE_LAYER_MEDIA_TYPE,
};
use oci_inspect::secrets::RegistryAuth;
use oci_inspect::ImageRef;
use anyhow::Context;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use tar::Archive;
use tracing::{debug, warn};

const MANIFESTS_DIR: &str = "manifests";
const CONFIGMAP_FILE: &str = "bpfman-config_v1_configmap.yaml";

lazy_static! {
    static ref DAEMON_IMAGE: Regex =
        Regex::new(r#"bpfman\.image:\s*["']?([^\s"']+)["']?"#).unwrap();
    static ref AGENT_IMAGE: Regex =
        Regex::new(r#"bpfman\.agent\.image:\s*["']?([^\s"']+)["']?"#).unwrap();
}

/// Unpacks a bundle image's filesystem to a directory.
///
/// A seam so extraction logic and its tests work from a directory of fixture
/// files instead of a registry.
#[async_trait]
pub trait BundleReader: Send + Sync {
    /// Unpacks the bundle image's layers under `dest`.
    async fn unpack(&self, image: &ImageRef, dest: &Path) -> anyhow::Result<()>;
}

/// Unpacks bundles by pulling their layers from the registry.
pub struct RegistryBundleReader {
    client: oci_inspect::Client,
    auth: RegistryAuth,
}

impl RegistryBundleReader {
    /// Wraps a registry client.
    pub fn new(client: oci_inspect::Client, auth: RegistryAuth) -> Self {
        RegistryBundleReader { client, auth }
    }
}

#[async_trait]
impl BundleReader for RegistryBundleReader {
    async fn unpack(&self, image: &ImageRef, dest: &Path) -> anyhow::Result<()> {
        let data = self.client.pull(image, &self.auth).await?;

        for layer in data.layers {
            match layer.media_type.as_str() {
                IMAGE_LAYER_MEDIA_TYPE => {
                    Archive::new(layer.data.as_slice())
                        .unpack(dest)
                        .context("unpacking tar layer")?;
                }
                IMAGE_LAYER_GZIP_MEDIA_TYPE | IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE => {
                    Archive::new(GzDecoder::new(layer.data.as_slice()))
                        .unpack(dest)
                        .context("unpacking tar+gzip layer")?;
                }
                other => {
                    warn!(media_type = %other, "Skipping layer with unhandled media type");
                }
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct ClusterServiceVersion {
    #[serde(default)]
    metadata: CsvObjectMeta,
    #[serde(default)]
    spec: CsvSpec,
}

#[derive(Deserialize, Default)]
struct CsvObjectMeta {
    #[serde(default)]
    annotations: std::collections::HashMap<String, String>,
}

#[derive(Deserialize, Default)]
struct CsvSpec {
    #[serde(default)]
    version: String,
    #[serde(default, rename = "relatedImages")]
    related_images: Vec<RelatedImage>,
}

#[derive(Deserialize)]
struct RelatedImage {
    #[serde(default)]
    image: String,
}

/// Version and creation annotation read from a bundle's CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvMetadata {
    /// `spec.version`.
    pub version: String,
    /// The `createdAt` annotation, verbatim.
    pub created_at: String,
}

/// Extracts every image reference a bundle declares.
///
/// The result starts with the bundle's own reference, followed by
/// `spec.relatedImages` in CSV order, then any ConfigMap-configured images.
/// Duplicates (exact string equality) are dropped, first occurrence wins.
pub async fn extract_image_references(
    reader: &dyn BundleReader,
    bundle: &ImageRef,
) -> Result<Vec<String>, AnalysisError> {
    debug!(%bundle, "Extracting image references from bundle");
    let dir = tempfile::tempdir().map_err(|e| AnalysisError::Extraction(e.into()))?;
    reader
        .unpack(bundle, dir.path())
        .await
        .map_err(AnalysisError::Extraction)?;

    let mut images = vec![bundle.whole()];

    let csv = read_csv(dir.path())
        .await
        .map_err(AnalysisError::Extraction)?;
    for related in csv.spec.related_images {
        if !related.image.is_empty() {
            debug!(image = %related.image, "Found related image");
            images.push(related.image);
        }
    }

    match read_configmap_images(dir.path()).await {
        Ok(configmap_images) => images.extend(configmap_images),
        Err(err) => warn!(%err, "Failed to extract ConfigMap images"),
    }

    Ok(deduplicate(images))
}

/// Reads `spec.version` and the `createdAt` annotation from a bundle's CSV.
/// Best-effort; `None` when the bundle cannot be read or carries neither.
pub async fn extract_csv_metadata(
    reader: &dyn BundleReader,
    bundle: &ImageRef,
) -> Option<CsvMetadata> {
    let dir = tempfile::tempdir().ok()?;
    reader.unpack(bundle, dir.path()).await.ok()?;
    let csv = read_csv(dir.path()).await.ok()?;

    let metadata = CsvMetadata {
        version: csv.spec.version,
        created_at: csv
            .metadata
            .annotations
            .get("createdAt")
            .cloned()
            .unwrap_or_default(),
    };
    if metadata.version.is_empty() && metadata.created_at.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

/// Finds and parses the ClusterServiceVersion under `manifests/`.
async fn read_csv(dir: &Path) -> anyhow::Result<ClusterServiceVersion> {
    let manifests = dir.join(MANIFESTS_DIR);
    let mut entries = tokio::fs::read_dir(&manifests)
        .await
        .with_context(|| format!("reading {}", manifests.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.contains("clusterserviceversion") || entry.file_type().await?.is_dir() {
            continue;
        }
        let data = tokio::fs::read(entry.path()).await?;
        match serde_yaml::from_slice(&data) {
            Ok(csv) => return Ok(csv),
            Err(err) => {
                debug!(file = %name, %err, "Failed to parse CSV candidate");
            }
        }
    }

    anyhow::bail!("bundle has no readable ClusterServiceVersion manifest")
}

/// The daemon and agent images configured through the `bpfman-config`
/// ConfigMap manifest, when the bundle ships one.
async fn read_configmap_images(dir: &Path) -> anyhow::Result<Vec<String>> {
    let path = dir.join(MANIFESTS_DIR).join(CONFIGMAP_FILE);
    let data = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let mut images = Vec::new();
    for pattern in [&*DAEMON_IMAGE, &*AGENT_IMAGE] {
        if let Some(captures) = pattern.captures(&data) {
            images.push(captures[1].to_owned());
        }
    }
    Ok(images)
}

fn deduplicate(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(item.clone())).collect()
}
