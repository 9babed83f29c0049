//! Error types for chart source operations

use chartsync_core::CoreError;
use thiserror::Error;

/// Chart source and cache errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Source Errors ============
    #[error("Invalid source URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No source URL could be fetched: {attempts}")]
    AllSourcesFailed { attempts: String },

    #[error("Chart path '{path}' not found in repository {url}")]
    SubpathNotFound { path: String, url: String },

    #[error("Chart path '{path}' in repository {url} is empty")]
    EmptySubpath { path: String, url: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {url}")]
    HttpError { status: u16, url: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("git clone of {url} failed: {message}")]
    GitFailed { url: String, message: String },

    // ============ Content Errors ============
    #[error(transparent)]
    Chart(#[from] CoreError),

    // ============ Cache Errors ============
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for chart source operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Whether the failure came from reaching the source rather than from
    /// what it returned. Only these move resolution on to the next URL.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RepoError::HttpError { .. }
                | RepoError::NetworkError { .. }
                | RepoError::Timeout { .. }
                | RepoError::GitFailed { .. }
        )
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout { seconds: 30 }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<walkdir::Error> for RepoError {
    fn from(e: walkdir::Error) -> Self {
        RepoError::Io(e.into())
    }
}
