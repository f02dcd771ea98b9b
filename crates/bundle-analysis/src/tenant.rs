//! Downstream-to-tenant-workspace reference conversion.
//!
//! Release builds land in a Konflux tenant workspace on quay.io before they
//! are published to the downstream registry, so an image that is not (yet)
//! reachable under its declared `registry.redhat.io/bpfman/...` reference may
//! still exist under the corresponding tenant repository. The conversion is
//! one-directional; a tenant reference is never mapped back.

use crate::error::AnalysisError;
use crate::types::RegistryType;
use oci_inspect::ImageRef;
use std::fmt;
use std::str::FromStr;

/// The downstream production registry.
pub const DOWNSTREAM_REGISTRY: &str = "registry.redhat.io";
/// The repository namespace downstream images live under, with its trailing
/// separator.
pub const DOWNSTREAM_NAMESPACE: &str = "bpfman/";
/// The registry hosting tenant workspaces.
pub const TENANT_REGISTRY: &str = "quay.io";
/// The tenant workspace namespace.
pub const TENANT_NAMESPACE: &str = "redhat-user-workloads/ocp-bpfman-tenant";

/// The components with a known tenant repository. Anything else falls back
/// to the generic `<component>-<stream>` pattern, so a newly added component
/// keeps working; this table exists so the known set is spelled out and
/// tested.
const KNOWN_COMPONENTS: &[&str] = &[
    "bpfman", // the daemon
    "bpfman-agent",
    "bpfman-operator",
    "bpfman-operator-bundle",
];

/// Which release stream's tenant repositories to look in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStream {
    /// The y-stream (next minor release).
    YStream,
    /// The z-stream (patch releases of the current minor).
    ZStream,
}

impl Default for ReleaseStream {
    fn default() -> Self {
        ReleaseStream::YStream
    }
}

impl fmt::Display for ReleaseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseStream::YStream => write!(f, "ystream"),
            ReleaseStream::ZStream => write!(f, "zstream"),
        }
    }
}

impl FromStr for ReleaseStream {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ystream" => Ok(ReleaseStream::YStream),
            "zstream" => Ok(ReleaseStream::ZStream),
            other => Err(AnalysisError::UnsupportedConversion {
                reference: other.to_owned(),
                reason: "unknown release stream (expected 'ystream' or 'zstream')".to_owned(),
            }),
        }
    }
}

/// The tenant repository path for a component in a stream.
fn tenant_repository(component: &str, stream: ReleaseStream) -> String {
    // Known and unknown components currently share the same shape; the
    // distinction is documented by tests against KNOWN_COMPONENTS.
    format!("{}/{}-{}", TENANT_NAMESPACE, component, stream)
}

/// Whether a component has a tenant repository this crate knows about.
pub fn is_known_component(component: &str) -> bool {
    KNOWN_COMPONENTS.contains(&component)
}

/// Converts a downstream reference to its tenant workspace equivalent,
/// keeping the tag or digest.
///
/// Only `registry.redhat.io/bpfman/<component>` references convert; anything
/// else is an [`AnalysisError::UnsupportedConversion`].
pub fn to_tenant_workspace(
    image: &ImageRef,
    stream: ReleaseStream,
) -> Result<ImageRef, AnalysisError> {
    if image.registry() != DOWNSTREAM_REGISTRY {
        return Err(AnalysisError::UnsupportedConversion {
            reference: image.whole(),
            reason: format!("can only convert {} references", DOWNSTREAM_REGISTRY),
        });
    }

    let component = image
        .repository()
        .strip_prefix(DOWNSTREAM_NAMESPACE)
        .filter(|c| !c.is_empty() && !c.contains('/'))
        .ok_or_else(|| AnalysisError::UnsupportedConversion {
            reference: image.whole(),
            reason: format!(
                "repository is not under the {} namespace",
                DOWNSTREAM_NAMESPACE.trim_end_matches('/')
            ),
        })?;

    Ok(ImageRef::from_parts(
        TENANT_REGISTRY,
        &tenant_repository(component, stream),
        image.tag(),
        image.digest(),
    ))
}

/// Classifies where a reference a lookup *succeeded against* lives.
///
/// Everything that is neither an obvious tenant workspace reference nor the
/// downstream registry counts as downstream: classification only refines a
/// lookup that worked, it never declares inaccessibility on its own.
pub fn classify(image: &ImageRef) -> RegistryType {
    if image.registry() == DOWNSTREAM_REGISTRY {
        RegistryType::Downstream
    } else if image.registry() == TENANT_REGISTRY
        && image.repository().contains("redhat-user-workloads")
    {
        RegistryType::Tenant
    } else {
        RegistryType::Downstream
    }
}

/// The ordered list of references to try when resolving an image: the
/// declared reference first, then its tenant conversion when one applies.
pub fn candidates(image: &ImageRef, stream: ReleaseStream) -> Vec<ImageRef> {
    let mut list = vec![image.clone()];
    if let Ok(tenant) = to_tenant_workspace(image, stream) {
        list.push(tenant);
    }
    list
}
