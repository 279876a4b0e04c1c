//! Controller-specific error types.
//!
//! Errors from the cluster client, CRD validation and asset decoding are
//! folded into `ControllerError` so reconcilers can use `?` throughout.

use cluster_client::ClusterError;
use crds::ValidationError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the GPU operator controllers.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster client error
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Custom resource failed validation; needs a user edit to clear
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Manifest asset could not be read or decoded
    #[error("Asset error in {path}: {message}")]
    Asset {
        /// File or directory at fault
        path: String,
        /// What went wrong
        message: String,
    },

    /// `containerRuntimeVersion` with an unknown prefix
    #[error("Unrecognized container runtime: {0:?}")]
    UnrecognizedRuntime(String),

    /// Nodes disagree on the container runtime
    #[error("Multiple container runtimes in use: {0} and {1}")]
    MixedRuntimes(String, String),

    /// Manifest template could not be transformed
    #[error("Transform failed for {object}: {message}")]
    Transform {
        /// Object being transformed
        object: String,
        /// What went wrong
        message: String,
    },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (asset directory, metrics listener)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Configuration problems that only a spec edit can fix.
    pub fn is_validation(&self) -> bool {
        matches!(self, ControllerError::Validation(_))
    }

    pub(crate) fn transform(object: &str, message: impl Into<String>) -> Self {
        ControllerError::Transform {
            object: object.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn asset(path: impl AsRef<std::path::Path>, message: impl std::fmt::Display) -> Self {
        ControllerError::Asset {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}
