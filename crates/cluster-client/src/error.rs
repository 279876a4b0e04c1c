//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API server
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing identifying fields
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    /// True for 404 responses.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound(_) => true,
            ClusterError::Kube(e) => is_status(e, 404),
            _ => false,
        }
    }

    /// True for 409 responses.
    pub fn is_conflict(&self) -> bool {
        match self {
            ClusterError::Conflict(_) => true,
            ClusterError::Kube(e) => is_status(e, 409),
            _ => false,
        }
    }
}

pub(crate) fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}
