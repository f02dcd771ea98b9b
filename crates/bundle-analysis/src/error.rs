//! The error taxonomy of the analysis engine.
//!
//! Only failures that abort an analysis are errors. A single declared image
//! that cannot be inspected is recorded in its
//! [`ImageResult`](crate::types::ImageResult) instead, so one broken image
//! never sinks the batch.

use oci_inspect::ParseError;
use thiserror::Error;

/// Errors returned by the analysis engine.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// An image reference string could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidReference(#[from] ParseError),

    /// A reference was asked to convert to a tenant workspace form it has no
    /// mapping for.
    #[error("cannot convert '{reference}' to a tenant workspace reference: {reason}")]
    UnsupportedConversion {
        /// The reference that could not be converted.
        reference: String,
        /// Why no mapping applies.
        reason: String,
    },

    /// A bundle-level registry lookup failed. Per-image lookup failures are
    /// carried as data, not as this error.
    #[error("failed to inspect '{reference}': {message}")]
    Inspection {
        /// The reference whose lookup failed.
        reference: String,
        /// The underlying failure.
        message: String,
    },

    /// The bundle's contents could not be unpacked or read.
    #[error("failed to extract bundle contents: {0}")]
    Extraction(#[source] anyhow::Error),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// Every item in a batch failed. Carries one cause per failed item.
    #[error("all {} fetches failed: {}", .causes.len(), .causes.join("; "))]
    Aggregate {
        /// The individual failures, in completion order.
        causes: Vec<String>,
    },

    /// An unknown output format name.
    #[error("unsupported output format '{0}' (expected 'text' or 'json')")]
    UnsupportedFormat(String),
}
