//! Provenance and accessibility analysis for operator bundle images.
//!
//! Given a bundle image reference, this crate determines whether the bundle
//! and every image it declares are reachable, in which registry class each
//! one lives (downstream or a Konflux tenant workspace), and what build
//! provenance (version, git commit, pull request) their labels record.
//!
//! The entry point is [`analyser::Analyser`]; [`lister::list_latest_bundles`]
//! enumerates recent bundle builds in a repository. Both talk to registries
//! through the [`inspect::ImageInspector`] seam so tests never need a
//! network.

pub mod analyser;
#[cfg(feature = "cli")]
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod format;
pub mod inspect;
pub mod lister;
pub mod metadata;
pub mod tenant;
pub mod types;

#[doc(inline)]
pub use analyser::Analyser;
#[doc(inline)]
pub use error::AnalysisError;
