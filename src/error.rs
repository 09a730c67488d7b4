use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by reconciliation, resolution and metrics collection.
///
/// Deferrals and filtered pods are never errors, they are reported through
/// [`crate::controller::ReconcileOutcome`] instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// The resource version used as a precondition for the patch was stale.
    #[error("pod {namespace}/{name} was modified concurrently")]
    Conflict { namespace: String, name: String },

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("could not determine platform of node {0}")]
    UnknownPlatform(String),

    #[error("invalid image reference {image}: {reason}")]
    InvalidReference { image: String, reason: String },

    #[error("failed to inspect image {image}: {source}")]
    Registry {
        image: String,
        #[source]
        source: oci_distribution::errors::OciDistributionError,
    },

    #[error("failed to read config of image {image}: {source}")]
    ImageConfig {
        image: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("image {image} has no creation time")]
    MissingCreationTime { image: String },

    #[error("inspecting image {image} timed out after {timeout:?}")]
    InspectTimeout { image: String, timeout: Duration },

    #[error("failed to encode image report: {0}")]
    ReportEncode(#[source] serde_json::Error),

    #[error("malformed image report on pod {namespace}/{name}: {source}")]
    ReportDecode {
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read auth config {path:?}: {source}")]
    AuthConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed auth config {path:?}: {source}")]
    AuthConfigFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("prometheus registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_reference(image: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidReference {
            image: image.into(),
            reason: reason.to_string(),
        }
    }

    pub fn registry(
        image: impl Into<String>,
        source: oci_distribution::errors::OciDistributionError,
    ) -> Self {
        Self::Registry {
            image: image.into(),
            source,
        }
    }

    pub fn missing_creation_time(image: impl Into<String>) -> Self {
        Self::MissingCreationTime {
            image: image.into(),
        }
    }
}
