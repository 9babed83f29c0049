//! Chart cache configuration
//!
//! The cache root is an explicit value handed to the resolver. Only
//! [`CacheConfig::from_env`] looks at the process environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable naming the chart cache root
pub const CHARTS_DIR_ENV: &str = "CHARTS_DIR";

/// Directory name used under the system temp dir when no root is given
pub const DEFAULT_DIR_NAME: &str = "chartsync-charts";

/// Where resolved charts are materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    root: PathBuf,
}

impl CacheConfig {
    /// Use `root` when given, otherwise the process default location
    pub fn new(root: Option<PathBuf>) -> Self {
        let root = root
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(Self::default_root);
        Self { root }
    }

    /// Read the root from `CHARTS_DIR`
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var_os(CHARTS_DIR_ENV))
    }

    fn from_env_value(value: Option<OsString>) -> Self {
        Self::new(value.map(PathBuf::from))
    }

    /// `<temp dir>/chartsync-charts`
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_DIR_NAME)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(None)
    }
}
