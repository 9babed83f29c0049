//! Chart metadata and on-disk chart loading

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};

/// Name of the chart definition file at the chart root
pub const CHART_FILE: &str = "Chart.yaml";

/// Chart metadata from `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart API version (v1 or v2)
    #[serde(default)]
    pub api_version: Option<String>,

    /// Chart name
    pub name: String,

    /// Chart version (semver)
    pub version: Version,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Version of the packaged application
    #[serde(default)]
    pub app_version: Option<String>,
}

/// A chart materialized in a directory
#[derive(Debug, Clone)]
pub struct LoadedChart {
    pub metadata: ChartMetadata,
    pub root: PathBuf,
}

impl LoadedChart {
    /// Load and validate a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join(CHART_FILE);
        if !chart_file.is_file() {
            return Err(CoreError::InvalidChart {
                message: format!("{} not found in {}", CHART_FILE, root.display()),
            });
        }

        let content = std::fs::read_to_string(&chart_file)?;
        let metadata: ChartMetadata =
            serde_yaml::from_str(&content).map_err(|e| CoreError::InvalidChart {
                message: format!("{}: {}", chart_file.display(), e),
            })?;

        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: format!("{} has an empty name", chart_file.display()),
            });
        }

        Ok(Self { metadata, root })
    }

    /// Check whether a directory looks like a chart root
    pub fn is_chart_dir(path: &Path) -> bool {
        path.join(CHART_FILE).is_file()
    }

    /// SHA-256 over every file's relative path and content, in path order
    pub fn content_digest(&self) -> Result<String> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| CoreError::Io(e.into()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let mut hasher = Sha256::new();
        for file in files {
            let rel = file.strip_prefix(&self.root).unwrap_or(&file);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(std::fs::read(&file)?);
        }
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}
