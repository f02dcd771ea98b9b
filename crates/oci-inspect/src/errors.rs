//! Errors returned by OCI compliant registries
//!
//! The registry API reports failures in a structured envelope, formally
//! described in the OCI distribution specification:
//! https://github.com/opencontainers/distribution-spec/blob/main/spec.md#error-codes

/// One error from a registry error envelope.
#[derive(serde::Deserialize, Debug)]
pub struct OciError {
    /// The error code
    pub code: OciErrorCode,
    /// An optional message associated with the error
    #[serde(default)]
    pub message: String,
    /// Unstructured optional data associated with the error
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl std::error::Error for OciError {}

impl std::fmt::Display for OciError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "OCI API error: {:?}", self.code)
        } else {
            write!(f, "OCI API error: {}", self.message)
        }
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct OciEnvelope {
    pub(crate) errors: Vec<OciError>,
}

/// The registry error codes this client distinguishes. Codes it has no
/// special handling for collapse into `Other`.
#[derive(serde::Deserialize, Debug, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OciErrorCode {
    /// The manifest, identified by name and tag, is unknown to the registry.
    ManifestUnknown,
    /// The repository name is not known to the registry.
    NameUnknown,
    /// The repository name is invalid.
    NameInvalid,
    /// Authentication is required.
    Unauthorized,
    /// Access to the resource is denied.
    Denied,
    /// The client is being rate limited.
    Toomanyrequests,
    /// Any other code.
    #[serde(other)]
    Other,
}

impl OciErrorCode {
    /// Whether this code means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)
    }
}
