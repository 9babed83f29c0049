//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidChart { message: String },

    #[error("Invalid values: {message}")]
    InvalidValues { message: String },

    #[error("Invalid source: {message}")]
    InvalidSource { message: String },

    #[error("Invalid release name '{name}': {reason}")]
    InvalidReleaseName { name: String, reason: String },

    #[error("Invalid chart name '{name}': {reason}")]
    InvalidChartName { name: String, reason: String },

    #[error("Invalid request identity: {0}")]
    InvalidIdentity(String),

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
