//! On-disk chart cache
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<chart>/            materialized chart, one subtree per chart name
//! <root>/.index/<chart>      digest of the archive last extracted for <chart>
//! <root>/.staging-XXXX/      in-flight downloads and checkouts
//! ```
//!
//! Chart names are validated to a single path component that never starts
//! with '.', so two charts can never alias the same subtree and no chart can
//! collide with the index or staging directories.

use chartsync_core::{LoadedChart, validate_chart_name};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::CacheConfig;
use crate::error::{RepoError, Result};

const INDEX_DIR: &str = ".index";
const STAGING_PREFIX: &str = ".staging-";
const REPLACE_ATTEMPTS: usize = 3;

/// Chart cache rooted at a configured directory
#[derive(Debug, Clone)]
pub struct ChartCache {
    root: PathBuf,
}

impl ChartCache {
    /// Open the cache, creating the root directory if needed
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let root = config.root().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cache path of a chart
    pub fn path_for(&self, chart_name: &str) -> Result<PathBuf> {
        validate_chart_name(chart_name)?;
        Ok(self.root.join(chart_name))
    }

    /// Create a scratch directory on the same filesystem as the cache so
    /// the finished tree can be moved into place with a rename
    pub fn stage(&self) -> Result<TempDir> {
        std::fs::create_dir_all(&self.root)?;
        Ok(tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)?)
    }

    /// Move a staged chart tree into place, replacing prior contents
    ///
    /// Two resolutions of the same chart may race here; the last rename wins.
    pub fn replace(&self, chart_name: &str, staged: &Path) -> Result<PathBuf> {
        let target = self.path_for(chart_name)?;

        for _ in 0..REPLACE_ATTEMPTS {
            remove_tree(&target)?;
            match std::fs::rename(staged, &target) {
                Ok(()) => return Ok(target),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::AlreadyExists | ErrorKind::DirectoryNotEmpty
                    ) =>
                {
                    tracing::debug!(
                        chart = chart_name,
                        "cache entry recreated concurrently, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RepoError::CacheError {
            message: format!("could not replace cache entry for chart '{}'", chart_name),
        })
    }

    /// Load the cached chart, failing if the entry is missing or damaged
    pub fn load(&self, chart_name: &str) -> Result<LoadedChart> {
        Ok(LoadedChart::load(self.path_for(chart_name)?)?)
    }

    /// Digest of the archive last extracted for `chart_name`
    pub fn recorded_digest(&self, chart_name: &str) -> Option<String> {
        let path = self.digest_path(chart_name).ok()?;
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Record (or with `None`, forget) the archive digest for `chart_name`
    pub fn record_digest(&self, chart_name: &str, digest: Option<&str>) -> Result<()> {
        let path = self.digest_path(chart_name)?;
        match digest {
            Some(digest) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, digest)?;
            }
            None => match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    /// Remove one chart from the cache
    pub fn remove(&self, chart_name: &str) -> Result<()> {
        self.record_digest(chart_name, None)?;
        remove_tree(&self.path_for(chart_name)?)
    }

    /// Remove every cached chart, the digest index and leftover staging
    /// directories. The root itself is kept.
    pub fn purge(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                remove_tree(&entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn digest_path(&self, chart_name: &str) -> Result<PathBuf> {
        validate_chart_name(chart_name)?;
        Ok(self.root.join(INDEX_DIR).join(chart_name))
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
