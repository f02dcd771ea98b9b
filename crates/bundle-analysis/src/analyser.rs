//! The analysis orchestrator.
//!
//! One [`Analyser::analyse`] call walks the whole pipeline: pin the bundle
//! reference to a digest, fetch the bundle's own metadata (falling back to
//! its tenant workspace copy), enrich it from the CSV, extract the declared
//! image set, inspect every declared image concurrently, and tally the
//! summary. Bundle-level steps fail the call; per-image failures are data in
//! the results.

use crate::error::AnalysisError;
use crate::extract::{self, BundleReader};
use crate::fetch;
use crate::inspect::{self, ImageInspector};
use crate::metadata;
use crate::tenant::{self, ReleaseStream};
use crate::types::{BundleAnalysis, ImageResult, RegistryType, Summary};
use oci_inspect::ImageRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// How many image inspections run at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Tunables for an analysis run.
#[derive(Debug, Clone)]
pub struct AnalyserOptions {
    /// Which release stream's tenant workspace to fall back to.
    pub stream: ReleaseStream,
    /// Concurrent image inspections.
    pub concurrency: usize,
    /// Whether to look up commit dates on the forge. Off means the
    /// `commit_date` fields simply stay empty.
    pub fetch_commit_dates: bool,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        AnalyserOptions {
            stream: ReleaseStream::default(),
            concurrency: DEFAULT_CONCURRENCY,
            fetch_commit_dates: true,
        }
    }
}

/// Analyses operator bundle images.
pub struct Analyser {
    inspector: Arc<dyn ImageInspector>,
    reader: Arc<dyn BundleReader>,
    http: reqwest::Client,
    options: AnalyserOptions,
}

impl Analyser {
    /// Builds an analyser over an inspector and a bundle reader.
    pub fn new(
        inspector: Arc<dyn ImageInspector>,
        reader: Arc<dyn BundleReader>,
        options: AnalyserOptions,
    ) -> Self {
        Analyser {
            inspector,
            reader,
            http: reqwest::Client::new(),
            options,
        }
    }

    /// Analyses one bundle.
    ///
    /// The result's `images` are in extraction order regardless of which
    /// inspection finished first.
    pub async fn analyse(
        &self,
        bundle_ref: &str,
        cancel: CancellationToken,
    ) -> Result<BundleAnalysis, AnalysisError> {
        let declared: ImageRef = bundle_ref.parse()?;

        // A tag is mutable; pin it so every later step, and the report
        // itself, names one exact bundle build.
        let bundle = if declared.is_pinned() {
            declared
        } else {
            info!(%declared, "Resolving tag reference to digest");
            let digest = self.inspector.resolve_digest(&declared).await?;
            let pinned = declared.with_digest(&digest);
            info!(%pinned, "Resolved to digest");
            pinned
        };

        info!(%bundle, "Inspecting bundle metadata");
        let (mut bundle_info, active_ref) = self.bundle_metadata(&bundle).await?;

        if let Some(csv) = extract::extract_csv_metadata(self.reader.as_ref(), &active_ref).await {
            debug!(version = %csv.version, created_at = %csv.created_at, "Found CSV metadata");
            bundle_info.csv_version = csv.version;
            bundle_info.csv_created_at = csv.created_at;
        }
        if self.options.fetch_commit_dates {
            self.enrich_commit_date(&mut bundle_info).await;
        }

        info!("Extracting image references from bundle");
        let references =
            extract::extract_image_references(self.reader.as_ref(), &active_ref).await?;
        info!(count = references.len(), "Inspecting declared images");

        let images = self.inspect_all(&references, cancel).await?;
        let summary = Summary::from_results(&images);

        Ok(BundleAnalysis {
            bundle_ref: bundle,
            bundle_info: Some(bundle_info),
            images,
            summary,
        })
    }

    /// The bundle's own provenance, from its declared reference or its
    /// tenant workspace copy. Returns the reference that actually answered,
    /// which later unpacking reuses. Failing both ways fails the analysis.
    async fn bundle_metadata(
        &self,
        bundle: &ImageRef,
    ) -> Result<(crate::types::ImageInfo, ImageRef), AnalysisError> {
        let candidates = tenant::candidates(bundle, self.options.stream);
        for candidate in &candidates {
            match self.inspector.inspect(candidate).await {
                Ok(info) => {
                    return Ok((
                        metadata::extract_metadata(&info.labels, info.created),
                        candidate.clone(),
                    ));
                }
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(err) => debug!(%candidate, %err, "Bundle candidate not accessible"),
            }
        }

        let message = if candidates.len() > 1 {
            "bundle not accessible in any registry"
        } else {
            "bundle not accessible and has no tenant workspace equivalent"
        };
        Err(AnalysisError::Inspection {
            reference: bundle.whole(),
            message: message.to_owned(),
        })
    }

    /// Inspects every declared image through the bounded coordinator and
    /// restores extraction order.
    async fn inspect_all(
        &self,
        references: &[String],
        cancel: CancellationToken,
    ) -> Result<Vec<ImageResult>, AnalysisError> {
        // Pre-fill with a placeholder per reference so an item the
        // coordinator dropped still appears in the report.
        let mut results: Vec<ImageResult> = references
            .iter()
            .map(|reference| ImageResult {
                reference: reference.clone(),
                accessible: false,
                registry: RegistryType::Inaccessible,
                tenant_ref: None,
                info: None,
                error: "inspection did not complete".to_owned(),
            })
            .collect();

        let worker = {
            let inspector = Arc::clone(&self.inspector);
            let http = self.http.clone();
            let stream = self.options.stream;
            let fetch_commit_dates = self.options.fetch_commit_dates;
            move |reference: String| {
                let inspector = Arc::clone(&inspector);
                let http = http.clone();
                async move {
                    let mut result =
                        inspect::inspect_image(inspector.as_ref(), &reference, stream).await?;
                    if fetch_commit_dates {
                        if let Some(info) = result.info.as_mut() {
                            if !info.git_commit.is_empty() && !info.git_url.is_empty() {
                                info.commit_date =
                                    metadata::fetch_commit_date(&http, &info.git_url, &info.git_commit)
                                        .await;
                            }
                        }
                    }
                    Ok(result)
                }
            }
        };

        let completed = fetch::fetch_all(
            references.to_vec(),
            self.options.concurrency.max(1),
            cancel,
            worker,
        )
        .await?;
        for (index, result) in completed {
            results[index] = result;
        }

        Ok(results)
    }

    async fn enrich_commit_date(&self, info: &mut crate::types::ImageInfo) {
        if !info.git_commit.is_empty() && !info.git_url.is_empty() {
            info.commit_date =
                metadata::fetch_commit_date(&self.http, &info.git_url, &info.git_commit).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inspect::test::FakeInspector;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;

    const DIGEST: &str = "sha256:f29dba55022eec8c0ce1cbfaaed45f2352ab3fbbb1cdcd5ea30ca3513deb70c9";

    const CSV: &str = r#"
kind: ClusterServiceVersion
metadata:
  name: bpfman-operator.v0.5.4
  annotations:
    createdAt: "2024-05-14T09:30:00Z"
spec:
  version: 0.5.4
  relatedImages:
    - name: operator
      image: registry.redhat.io/bpfman/bpfman-operator:v0.5.4
    - name: agent
      image: registry.redhat.io/bpfman/bpfman-agent:v0.5.4
    - name: broken
      image: badref
"#;

    struct FixtureReader {
        files: HashMap<&'static str, &'static str>,
    }

    #[async_trait]
    impl BundleReader for FixtureReader {
        async fn unpack(&self, _image: &ImageRef, dest: &Path) -> anyhow::Result<()> {
            for (name, contents) in &self.files {
                let path = dest.join(name);
                tokio::fs::create_dir_all(path.parent().unwrap()).await?;
                tokio::fs::write(path, contents).await?;
            }
            Ok(())
        }
    }

    fn reader() -> Arc<FixtureReader> {
        Arc::new(FixtureReader {
            files: [("manifests/csv.clusterserviceversion.yaml", CSV)]
                .into_iter()
                .collect(),
        })
    }

    fn options() -> AnalyserOptions {
        AnalyserOptions {
            fetch_commit_dates: false,
            ..AnalyserOptions::default()
        }
    }

    #[tokio::test]
    async fn analyses_a_bundle_end_to_end() {
        let bundle_tag = "registry.redhat.io/bpfman/bpfman-operator-bundle:latest";
        let bundle_pinned = format!("registry.redhat.io/bpfman/bpfman-operator-bundle@{}", DIGEST);

        let mut fake = FakeInspector::with_labels(&[
            // The tag resolves, and the pinned bundle answers directly.
            (bundle_tag, &[("version", "0.5.4")]),
            (
                bundle_pinned.as_str(),
                &[("version", "0.5.4"), ("vcs-ref", "deadbeefcafe")],
            ),
            // The operator is live downstream.
            (
                "registry.redhat.io/bpfman/bpfman-operator:v0.5.4",
                &[("version", "0.5.4")],
            ),
            // The agent is only in its tenant workspace.
            (
                "quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-agent-ystream:v0.5.4",
                &[("version", "0.5.4")],
            ),
        ]);
        // Every fake answers with the same digest, which is what pinning needs.
        for info in fake.images.values_mut() {
            info.digest = DIGEST.to_owned();
        }
        let inspector = Arc::new(fake);

        let analyser = Analyser::new(inspector, reader(), options());
        let analysis = analyser
            .analyse(bundle_tag, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bundle_pinned, analysis.bundle_ref.whole());
        let bundle_info = analysis.bundle_info.unwrap();
        assert_eq!("0.5.4", bundle_info.version);
        assert_eq!("0.5.4", bundle_info.csv_version);
        assert_eq!("2024-05-14T09:30:00Z", bundle_info.csv_created_at);

        // Extraction order: the bundle itself, then relatedImages.
        assert_eq!(4, analysis.images.len());
        assert_eq!(bundle_pinned, analysis.images[0].reference);
        assert!(analysis.images[0].accessible);

        let operator = &analysis.images[1];
        assert!(operator.accessible);
        assert_eq!(RegistryType::Downstream, operator.registry);

        let agent = &analysis.images[2];
        assert!(agent.accessible);
        assert_eq!(RegistryType::Tenant, agent.registry);
        assert!(agent.tenant_ref.as_deref().unwrap().contains("ocp-bpfman-tenant"));

        // The malformed reference is a result, not a failure.
        let broken = &analysis.images[3];
        assert!(!broken.accessible);
        assert!(broken.error.starts_with("invalid image reference"));

        assert_eq!(
            Summary {
                total_images: 4,
                accessible_images: 3,
                downstream_images: 2,
                tenant_images: 1,
                inaccessible_images: 1,
            },
            analysis.summary
        );
    }

    #[tokio::test]
    async fn bundle_metadata_falls_back_to_the_tenant_copy() {
        let bundle_pinned = format!("registry.redhat.io/bpfman/bpfman-operator-bundle@{}", DIGEST);
        let tenant_bundle = format!(
            "quay.io/redhat-user-workloads/ocp-bpfman-tenant/bpfman-operator-bundle-ystream@{}",
            DIGEST
        );
        let inspector = Arc::new(FakeInspector::with_labels(&[(
            tenant_bundle.as_str(),
            &[("version", "0.5.5")],
        )]));

        let analyser = Analyser::new(inspector, reader(), options());
        let analysis = analyser
            .analyse(&bundle_pinned, CancellationToken::new())
            .await
            .unwrap();

        // The report names the declared bundle even though the tenant copy
        // answered.
        assert_eq!(bundle_pinned, analysis.bundle_ref.whole());
        assert_eq!("0.5.5", analysis.bundle_info.unwrap().version);
    }

    #[tokio::test]
    async fn unreachable_bundle_fails_the_analysis() {
        let analyser = Analyser::new(Arc::new(FakeInspector::new(&[])), reader(), options());
        let err = analyser
            .analyse(
                &format!("registry.redhat.io/bpfman/bpfman-operator-bundle@{}", DIGEST),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            AnalysisError::Inspection { message, .. } => {
                assert_eq!("bundle not accessible in any registry", message)
            }
            other => panic!("expected Inspection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_bundle_reference_is_rejected() {
        let analyser = Analyser::new(Arc::new(FakeInspector::new(&[])), reader(), options());
        let err = analyser
            .analyse("badref", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn cancelled_analysis_surfaces_cancellation() {
        let bundle_pinned = format!("registry.redhat.io/bpfman/bpfman-operator-bundle@{}", DIGEST);
        let inspector = Arc::new(FakeInspector::with_labels(&[(
            bundle_pinned.as_str(),
            &[("version", "0.5.4")],
        )]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let analyser = Analyser::new(inspector, reader(), options());
        let err = analyser.analyse(&bundle_pinned, cancel).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
