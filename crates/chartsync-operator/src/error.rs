//! Operator error types with exit code handling

use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// Fatal errors that stop the operator process
#[derive(Error, Debug, Diagnostic)]
pub enum OperatorError {
    /// The chart cache could not be set up
    #[error("Chart cache error: {message}")]
    #[diagnostic(
        code(chartsync::operator::cache),
        help("check that --charts-dir (or CHARTS_DIR) points to a writable directory")
    )]
    Cache { message: String },

    /// No usable cluster configuration
    #[error("Kubernetes client error: {message}")]
    #[diagnostic(
        code(chartsync::operator::client),
        help("set KUBECONFIG or run inside a cluster with a service account")
    )]
    Client { message: String },

    /// The controller stopped with an error
    #[error("Controller error: {message}")]
    #[diagnostic(
        code(chartsync::operator::controller),
        help("is the ReleaseRequest CRD installed? `chartsync crd | kubectl apply -f -`")
    )]
    Controller { message: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(chartsync::operator::serialization))]
    Serialization { message: String },
}

impl OperatorError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            OperatorError::Cache { .. } => exit_codes::IO_ERROR,
            OperatorError::Client { .. } => exit_codes::CONFIG_ERROR,
            OperatorError::Controller { .. } => exit_codes::ERROR,
            OperatorError::Serialization { .. } => exit_codes::ERROR,
        }
    }
}

impl From<chartsync_repo::RepoError> for OperatorError {
    fn from(e: chartsync_repo::RepoError) -> Self {
        OperatorError::Cache {
            message: e.to_string(),
        }
    }
}

impl From<chartsync_kube::KubeError> for OperatorError {
    fn from(e: chartsync_kube::KubeError) -> Self {
        OperatorError::Controller {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(e: serde_yaml::Error) -> Self {
        OperatorError::Serialization {
            message: e.to_string(),
        }
    }
}
