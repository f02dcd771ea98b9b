//! Registry inspection behind a trait seam.
//!
//! [`ImageInspector`] is the only place the analysis engine touches a
//! registry, so the orchestrator and its tests run against fakes. The
//! production implementation wraps an [`oci_inspect::Client`].

use crate::error::AnalysisError;
use crate::metadata;
use crate::tenant::{self, ReleaseStream};
use crate::types::{ImageResult, RegistryType};
use async_trait::async_trait;
use oci_inspect::client::InspectInfo;
use oci_inspect::secrets::RegistryAuth;
use oci_inspect::ImageRef;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read-only registry lookups the analysis needs.
#[async_trait]
pub trait ImageInspector: Send + Sync {
    /// Fetches an image's digest, creation time and labels.
    async fn inspect(&self, image: &ImageRef) -> Result<InspectInfo, AnalysisError>;

    /// Resolves the manifest digest an image reference currently points at.
    async fn resolve_digest(&self, image: &ImageRef) -> Result<String, AnalysisError>;

    /// Lists every tag in an image's repository.
    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>, AnalysisError>;
}

/// The production inspector: an [`oci_inspect::Client`] plus credentials.
pub struct RegistryInspector {
    client: oci_inspect::Client,
    auth: RegistryAuth,
    cancel: CancellationToken,
}

impl RegistryInspector {
    /// Wraps a registry client. The client is shared as-is, so lookups
    /// dispatched concurrently overlap. Every lookup is raced against
    /// `cancel`; a cancelled lookup drops its in-flight request and surfaces
    /// [`AnalysisError::Cancelled`].
    pub fn new(client: oci_inspect::Client, auth: RegistryAuth, cancel: CancellationToken) -> Self {
        RegistryInspector {
            client,
            auth,
            cancel,
        }
    }

    fn inspection_error(&self, image: &ImageRef, err: anyhow::Error) -> AnalysisError {
        AnalysisError::Inspection {
            reference: image.whole(),
            message: format!("{:#}", err),
        }
    }
}

#[async_trait]
impl ImageInspector for RegistryInspector {
    async fn inspect(&self, image: &ImageRef) -> Result<InspectInfo, AnalysisError> {
        tokio::select! {
            result = self.client.inspect(image, &self.auth) => {
                result.map_err(|e| self.inspection_error(image, e))
            }
            _ = self.cancel.cancelled() => Err(AnalysisError::Cancelled),
        }
    }

    async fn resolve_digest(&self, image: &ImageRef) -> Result<String, AnalysisError> {
        tokio::select! {
            result = self.client.fetch_manifest_digest(image, &self.auth) => {
                result.map_err(|e| self.inspection_error(image, e))
            }
            _ = self.cancel.cancelled() => Err(AnalysisError::Cancelled),
        }
    }

    async fn list_tags(&self, image: &ImageRef) -> Result<Vec<String>, AnalysisError> {
        tokio::select! {
            result = self.client.list_tags(image, &self.auth) => {
                result.map_err(|e| self.inspection_error(image, e))
            }
            _ = self.cancel.cancelled() => Err(AnalysisError::Cancelled),
        }
    }
}

/// Inspects one declared image, trying the declared reference first and its
/// tenant workspace conversion second.
///
/// A malformed reference or an image reachable in neither place is an
/// `accessible: false` *result*; only cancellation escapes as an error, so
/// one bad image never aborts the batch it is part of.
pub async fn inspect_image(
    inspector: &dyn ImageInspector,
    reference: &str,
    stream: ReleaseStream,
) -> Result<ImageResult, AnalysisError> {
    debug!(%reference, %stream, "Inspecting declared image");

    let image: ImageRef = match reference.parse() {
        Ok(image) => image,
        Err(err) => {
            return Ok(ImageResult {
                reference: reference.to_owned(),
                accessible: false,
                registry: RegistryType::Inaccessible,
                tenant_ref: None,
                info: None,
                error: format!("invalid image reference: {}", err),
            });
        }
    };

    let candidates = tenant::candidates(&image, stream);
    for (position, candidate) in candidates.iter().enumerate() {
        match inspector.inspect(candidate).await {
            Ok(info) => {
                debug!(%candidate, "Image accessible");
                // A hit past the head of the list means the declared
                // reference itself did not answer; record where it was found.
                let fallback = position > 0;
                return Ok(ImageResult {
                    reference: reference.to_owned(),
                    accessible: true,
                    registry: if fallback {
                        RegistryType::Tenant
                    } else {
                        tenant::classify(candidate)
                    },
                    tenant_ref: fallback.then(|| candidate.whole()),
                    info: Some(metadata::extract_metadata(&info.labels, info.created)),
                    error: String::new(),
                });
            }
            Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
            Err(err) => debug!(%candidate, %err, "Candidate not accessible"),
        }
    }

    let error = if candidates.len() > 1 {
        "not accessible in downstream or tenant registry"
    } else {
        "not accessible in any registry"
    };
    Ok(ImageResult {
        reference: reference.to_owned(),
        accessible: false,
        registry: RegistryType::Inaccessible,
        tenant_ref: None,
        info: None,
        error: error.to_owned(),
    })
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use oci_inspect::client::{ClientConfig, ClientProtocol};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // Compiles only while lookups go through a shared `&self` client; an
    // inspector that needed exclusive access could not be driven from
    // several tasks at once like the coordinator drives it.
    #[tokio::test]
    async fn registry_inspector_serves_overlapping_lookups() {
        let inspector = Arc::new(RegistryInspector::new(
            oci_inspect::Client::new(ClientConfig {
                protocol: ClientProtocol::Http,
                ..ClientConfig::default()
            }),
            RegistryAuth::Anonymous,
            CancellationToken::new(),
        ));
        let image: ImageRef = "127.0.0.1:1/bpfman/bpfman:latest".parse().unwrap();

        let lookups: Vec<_> = (0..3)
            .map(|_| {
                let inspector = Arc::clone(&inspector);
                let image = image.clone();
                tokio::spawn(async move { inspector.inspect(&image).await })
            })
            .collect();
        for lookup in lookups {
            assert!(lookup.await.unwrap().is_err());
        }
    }

    /// An inspector answering from a fixed reference→info table.
    pub(crate) struct FakeInspector {
        pub images: HashMap<String, InspectInfo>,
        pub tags: Vec<String>,
        pub calls: AtomicUsize,
    }

    impl FakeInspector {
        pub fn new(entries: &[(&str, InspectInfo)]) -> Self {
            FakeInspector {
                images: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                tags: Vec::new(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_labels(entries: &[(&str, &[(&str, &str)])]) -> Self {
            Self::new(
                &entries
                    .iter()
                    .map(|(reference, labels)| {
                        (
                            *reference,
                            InspectInfo {
                                digest: format!("sha256:{}", "0".repeat(64)),
                                created: None,
                                labels: labels
                                    .iter()
                                    .map(|(k, v)| (k.to_string(), v.to_string()))
                                    .collect(),
                            },
                        )
                    })
                    .collect::<Vec<_>>(),
            )
        }
    }

    #[async_trait]
    impl ImageInspector for FakeInspector {
        async fn inspect(&self, image: &ImageRef) -> Result<InspectInfo, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.images
                .get(&image.whole())
                .cloned()
                .ok_or_else(|| AnalysisError::Inspection {
                    reference: image.whole(),
                    message: "manifest unknown".to_owned(),
                })
        }

        async fn resolve_digest(&self, image: &ImageRef) -> Result<String, AnalysisError> {
            self.inspect(image).await.map(|info| info.digest)
        }

        async fn list_tags(&self, _image: &ImageRef) -> Result<Vec<String>, AnalysisError> {
            Ok(self.tags.clone())
        }
    }

    #[tokio::test]
    async fn accessible_downstream_image() {
        let inspector = FakeInspector::with_labels(&[(
            "registry.redhat.io/bpfman/bpfman-agent:v0.5.4",
            &[("version", "0.5.4")],
        )]);
        let result = inspect_image(
            &inspector,
            "registry.redhat.io/bpfman/bpfman-agent:v0.5.4",
            ReleaseStream::YStream,
        )
        .await
        .unwrap();

        assert!(result.accessible);
        assert_eq!(RegistryType::Downstream, result.registry);
        assert_eq!(None, result.tenant_ref);
        assert_eq!("0.5.4", result.info.unwrap().version);
    }

    #[tokio::test]
    async fn falls_back_to_tenant_workspace() {
        let inspector = FakeInspector::with_labels(&[(
            "quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-agent-ystream:v0.5.4",
            &[("version", "0.5.4")],
        )]);
        let result = inspect_image(
            &inspector,
            "registry.redhat.io/bpfman/bpfman-agent:v0.5.4",
            ReleaseStream::YStream,
        )
        .await
        .unwrap();

        assert!(result.accessible);
        assert_eq!(RegistryType::Tenant, result.registry);
        assert_eq!(
            Some("quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-agent-ystream:v0.5.4"),
            result.tenant_ref.as_deref()
        );
        // The declared reference is preserved even when the tenant copy answered.
        assert_eq!("registry.redhat.io/bpfman/bpfman-agent:v0.5.4", result.reference);
    }

    #[tokio::test]
    async fn unparseable_reference_is_an_inaccessible_result() {
        let inspector = FakeInspector::new(&[]);
        let result = inspect_image(&inspector, "badref", ReleaseStream::YStream)
            .await
            .unwrap();
        assert!(!result.accessible);
        assert_eq!(RegistryType::Inaccessible, result.registry);
        assert!(result.error.starts_with("invalid image reference"));
        // No lookup was even attempted.
        assert_eq!(0, inspector.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unconvertible_image_fails_after_one_lookup() {
        let inspector = FakeInspector::new(&[]);
        let result = inspect_image(
            &inspector,
            "quay.io/elsewhere/thing:1",
            ReleaseStream::YStream,
        )
        .await
        .unwrap();
        assert!(!result.accessible);
        assert_eq!("not accessible in any registry", result.error);
        assert_eq!(1, inspector.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn both_lookups_failing_is_an_inaccessible_result() {
        let inspector = FakeInspector::new(&[]);
        let result = inspect_image(
            &inspector,
            "registry.redhat.io/bpfman/bpfman:v0.5.4",
            ReleaseStream::YStream,
        )
        .await
        .unwrap();
        assert!(!result.accessible);
        assert_eq!(
            "not accessible in downstream or tenant registry",
            result.error
        );
        assert_eq!(2, inspector.calls.load(Ordering::SeqCst));
    }
}
