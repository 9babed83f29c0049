//! Chart source descriptors
//!
//! A release request declares its source in the wire shape [`SourceSpec`]
//! (a type discriminator plus one populated block). Validation turns that
//! into the tagged union [`ChartSource`] the resolver works with.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::{CoreError, Result};

/// Kind of chart source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Version-controlled repository with a chart subpath
    Git,
    /// Remote packaged-archive repository
    #[serde(rename = "helmrepo")]
    HelmRepo,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::HelmRepo => write!(f, "helmrepo"),
        }
    }
}

/// Source block as it appears on a release request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub source_type: SourceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_repo: Option<RepoSource>,
}

impl SourceSpec {
    pub fn git(urls: Vec<String>, chart_path: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Git,
            git: Some(GitSource {
                urls,
                chart_path: chart_path.into(),
            }),
            helm_repo: None,
        }
    }

    pub fn helm_repo(urls: Vec<String>) -> Self {
        Self {
            source_type: SourceType::HelmRepo,
            git: None,
            helm_repo: Some(RepoSource { urls }),
        }
    }

    /// Validate the wire shape and convert it into a [`ChartSource`]
    pub fn to_source(&self) -> Result<ChartSource> {
        match self.source_type {
            SourceType::Git => {
                let git = self.git.as_ref().ok_or_else(|| CoreError::MissingField {
                    field: "source.git".to_string(),
                })?;
                git.validate()?;
                Ok(ChartSource::Git(git.clone()))
            }
            SourceType::HelmRepo => {
                let repo = self
                    .helm_repo
                    .as_ref()
                    .ok_or_else(|| CoreError::MissingField {
                        field: "source.helmRepo".to_string(),
                    })?;
                validate_urls(&repo.urls, "source.helmRepo.urls", false)?;
                Ok(ChartSource::Repo(repo.clone()))
            }
        }
    }
}

/// Git repository source: clone one of `urls`, use the chart at `chart_path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub urls: Vec<String>,
    pub chart_path: String,
}

impl GitSource {
    fn validate(&self) -> Result<()> {
        validate_urls(&self.urls, "source.git.urls", true)?;

        let trimmed = self.chart_path.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(CoreError::MissingField {
                field: "source.git.chartPath".to_string(),
            });
        }

        let escapes = Path::new(trimmed)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(CoreError::InvalidSource {
                message: format!(
                    "chartPath '{}' must be relative and stay inside the repository",
                    self.chart_path
                ),
            });
        }

        Ok(())
    }

    /// Chart path normalized to a relative path
    pub fn subpath(&self) -> &str {
        self.chart_path.trim().trim_matches('/')
    }
}

/// Archive repository source: download the first `urls` entry that answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RepoSource {
    pub urls: Vec<String>,
}

/// Validated chart source
#[derive(Debug, Clone, PartialEq)]
pub enum ChartSource {
    Git(GitSource),
    Repo(RepoSource),
}

fn validate_urls(urls: &[String], field: &str, allow_scp: bool) -> Result<()> {
    if urls.is_empty() {
        return Err(CoreError::MissingField {
            field: field.to_string(),
        });
    }

    for raw in urls {
        if allow_scp && is_scp_like(raw) {
            continue;
        }
        url::Url::parse(raw).map_err(|e| CoreError::InvalidSource {
            message: format!("{} contains an invalid URL '{}': {}", field, raw, e),
        })?;
    }

    Ok(())
}

/// `git@host:org/repo.git` style remotes, which are not URLs
fn is_scp_like(raw: &str) -> bool {
    match raw.split_once(':') {
        Some((host, path)) => {
            host.contains('@') && !host.contains('/') && !path.is_empty() && !path.starts_with("//")
        }
        None => false,
    }
}
