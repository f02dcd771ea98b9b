//! OCI manifest, image index and image configuration types
use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// The mediatype for an OCI manifest.
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// The mediatype for a Docker manifest list.
pub const IMAGE_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// The mediatype for an OCI image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// The mediatype for an OCI image index.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// The mediatype for a layer.
pub const IMAGE_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";
/// The mediatype for a layer that is gzipped.
pub const IMAGE_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// The mediatype that Docker uses for a layer that is gzipped.
pub const IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// The OS an image index entry is selected for.
pub const DEFAULT_OS: &str = "linux";
/// The architecture an image index entry is selected for.
pub const DEFAULT_ARCHITECTURE: &str = "amd64";

/// The OCI manifest describes one platform's image: its config object and
/// its layers.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    /// The manifest schema version. Only `2` is in use.
    pub schema_version: u8,

    /// An optional media type describing this manifest.
    pub media_type: Option<String>,

    /// The image configuration descriptor.
    pub config: OciDescriptor,

    /// The image layers.
    pub layers: Vec<OciDescriptor>,
}

/// A generic OCI descriptor: a typed, sized pointer to another object.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    /// The media type of the referenced content.
    pub media_type: String,
    /// The SHA-256 digest of the referenced content.
    pub digest: String,
    /// The size, in bytes, of the referenced content.
    pub size: i64,
    /// The platform the referenced manifest targets. Only present on image
    /// index entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// The platform of an image index entry.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`.
    pub architecture: String,
    /// Operating system, e.g. `linux`.
    pub os: String,
}

/// An image index (or Docker manifest list): a set of per-platform manifest
/// descriptors.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciImageIndex {
    /// The manifest schema version.
    pub schema_version: u8,
    /// An optional media type describing this index.
    pub media_type: Option<String>,
    /// The per-platform manifests.
    pub manifests: Vec<OciDescriptor>,
}

impl OciImageIndex {
    /// Selects the descriptor for the given OS/architecture pair, if any.
    pub fn select_platform(&self, os: &str, architecture: &str) -> Option<&OciDescriptor> {
        self.manifests.iter().find(|entry| {
            entry
                .platform
                .as_ref()
                .map(|p| p.os == os && p.architecture == architecture)
                .unwrap_or(false)
        })
    }
}

/// The subset of the image configuration object this crate inspects: the
/// creation timestamp and the label map.
///
/// Both the OCI image config and Docker's are accepted; the label map is
/// nested under `config.Labels` in either.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ConfigFile {
    /// When the image was created.
    pub created: Option<DateTime<Utc>>,
    /// The runtime configuration section holding the labels.
    pub config: Option<ConfigSection>,
}

/// The runtime configuration section of an image config.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ConfigSection {
    /// The image's label map. Absent labels and an absent map are
    /// equivalent here.
    #[serde(rename = "Labels")]
    pub labels: Option<HashMap<String, String>>,
}

impl ConfigFile {
    /// The label map, or an empty map when none is present.
    pub fn labels(self) -> HashMap<String, String> {
        self.config.and_then(|c| c.labels).unwrap_or_default()
    }
}

/// The response of the `/v2/<name>/tags/list` endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TagList {
    /// The repository name.
    pub name: String,
    /// Every tag in the repository.
    #[serde(default)]
    pub tags: Vec<String>,
}
