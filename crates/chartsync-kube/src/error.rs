//! Error types for chartsync-kube

use chartsync_core::CoreError;
use chartsync_repo::RepoError;
use thiserror::Error;

/// Result type for chartsync-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while converging release requests
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The request is statically invalid
    #[error("invalid release request: {0}")]
    Validation(String),

    /// The request tries to rename a release that is already installed
    #[error("releaseName cannot change from '{bound}' to '{requested}' after install\nHint: create a new ReleaseRequest for the new name")]
    ReleaseNameImmutable { bound: String, requested: String },

    /// Chart content could not be materialized
    #[error("chart source unavailable: {0}")]
    Source(#[from] RepoError),

    /// The release name is held by a release this request does not own
    #[error("release '{name}' in namespace '{namespace}' is owned by {owner}")]
    NameConflict {
        name: String,
        namespace: String,
        owner: String,
    },

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Release already exists
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// The packaging engine failed
    #[error("packaging engine error: {message}")]
    Engine { message: String, permanent: bool },

    /// A release request is not in the store
    #[error("release request '{identity}' not found")]
    RecordNotFound { identity: String },

    /// Optimistic-concurrency failure writing a release request
    #[error("release request '{identity}' was modified concurrently")]
    Conflict { identity: String },

    /// The reconciliation deadline expired
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<CoreError> for KubeError {
    fn from(e: CoreError) -> Self {
        KubeError::Validation(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::RecordNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            KubeError::Conflict { .. } => true,
            _ => false,
        }
    }

    /// Whether retrying against the unchanged request cannot help
    pub fn is_permanent(&self) -> bool {
        match self {
            KubeError::Validation(_)
            | KubeError::ReleaseNameImmutable { .. }
            | KubeError::NameConflict { .. } => true,
            KubeError::Engine { permanent, .. } => *permanent,
            _ => false,
        }
    }
}
