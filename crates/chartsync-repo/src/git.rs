//! Git repository checkouts
//!
//! Repositories are cloned with the `git` binary (shallow, default branch)
//! into a staging directory; only the chart subpath is kept.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use walkdir::WalkDir;

use crate::error::{RepoError, Result};

/// Runs `git clone` and extracts a chart subpath from the checkout
#[derive(Debug, Clone)]
pub struct GitFetcher {
    binary: PathBuf,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

impl GitFetcher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Clone the first reachable URL into `dest`, returning the URL used
    pub async fn clone_first(&self, urls: &[String], dest: &Path) -> Result<String> {
        let mut attempts = Vec::new();

        for url in urls {
            match self.clone_one(url, dest).await {
                Ok(()) => return Ok(url.clone()),
                Err(e) if e.is_transport() => {
                    tracing::warn!(url = %url, error = %e, "git source unavailable, trying next");
                    attempts.push(format!("{}: {}", url, e));
                    if dest.exists() {
                        std::fs::remove_dir_all(dest)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(RepoError::AllSourcesFailed {
            attempts: attempts.join("; "),
        })
    }

    async fn clone_one(&self, url: &str, dest: &Path) -> Result<()> {
        tracing::info!(url = %url, "cloning chart repository");

        // The child is killed if the reconciliation is cancelled mid-clone
        let output = tokio::process::Command::new(&self.binary)
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--quiet")
            .arg("--")
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RepoError::GitFailed {
                url: url.to_string(),
                message: format!("failed to run {}: {}", self.binary.display(), e),
            })?;

        if !output.status.success() {
            return Err(RepoError::GitFailed {
                url: url.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Copy `subpath` of a checkout into `dest`, skipping VCS metadata
///
/// A missing subpath, or one with no files in it, is an error.
pub fn copy_subpath(checkout: &Path, subpath: &str, dest: &Path, url: &str) -> Result<()> {
    let source = checkout.join(subpath);
    if !source.is_dir() {
        return Err(RepoError::SubpathNotFound {
            path: subpath.to_string(),
            url: url.to_string(),
        });
    }

    std::fs::create_dir_all(dest)?;
    let mut copied = 0usize;

    let walker = WalkDir::new(&source)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(&source).unwrap_or(entry.path());
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    if copied == 0 {
        return Err(RepoError::EmptySubpath {
            path: subpath.to_string(),
            url: url.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkout_with_chart(root: &Path) {
        let chart = root.join("charts").join("app");
        std::fs::create_dir_all(chart.join("templates")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::write(chart.join("Chart.yaml"), "name: app\nversion: 1.0.0\n").unwrap();
        std::fs::write(chart.join("templates").join("cm.yaml"), "kind: ConfigMap\n").unwrap();
        std::fs::create_dir_all(root.join("charts").join("empty").join("nested")).unwrap();
    }

    #[test]
    fn test_copy_subpath() {
        let temp = TempDir::new().unwrap();
        let checkout = temp.path().join("checkout");
        checkout_with_chart(&checkout);

        let dest = temp.path().join("dest");
        copy_subpath(&checkout, "charts/app", &dest, "repo").unwrap();

        assert!(dest.join("Chart.yaml").exists());
        assert!(dest.join("templates").join("cm.yaml").exists());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn test_missing_subpath() {
        let temp = TempDir::new().unwrap();
        checkout_with_chart(temp.path());

        let err = copy_subpath(temp.path(), "wrong/path", &temp.path().join("d"), "repo")
            .unwrap_err();
        assert!(matches!(err, RepoError::SubpathNotFound { .. }));
    }

    #[test]
    fn test_empty_subpath() {
        let temp = TempDir::new().unwrap();
        checkout_with_chart(temp.path());

        let err = copy_subpath(temp.path(), "charts/empty", &temp.path().join("d"), "repo")
            .unwrap_err();
        assert!(matches!(err, RepoError::EmptySubpath { .. }));
    }

    #[tokio::test]
    async fn test_missing_git_binary_is_transport_failure() {
        let temp = TempDir::new().unwrap();
        let fetcher = GitFetcher::new(temp.path().join("no-such-git"));
        let err = fetcher
            .clone_first(
                &["https://example.invalid/repo.git".to_string()],
                &temp.path().join("checkout"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::AllSourcesFailed { .. }));
    }
}
