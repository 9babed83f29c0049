//! Release manager
//!
//! Built fresh for every reconciliation from one release request and the
//! chart path its source resolved to. It owns the ownership rules: a
//! release is only upgraded or removed when the engine reports it as
//! belonging to this request.

use chartsync_core::Values;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::crd::{ReleaseRequest, ValidatedRequest};
use crate::engine::{EngineRelease, PackagingEngine, ReleaseOwner, ReleaseTarget};
use crate::error::{KubeError, Result};

/// Engine timeout when the caller sets none
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(300);

/// What the engine currently holds under the release name
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseState {
    Absent,
    /// Installed by this request
    Owned(EngineRelease),
    /// Installed by another request or outside chartsync
    Foreign(EngineRelease),
}

/// Install, upgrade or remove the release of one request
#[derive(Clone)]
pub struct ReleaseManager {
    engine: Arc<dyn PackagingEngine>,
    release_name: String,
    namespace: String,
    owner: ReleaseOwner,
    chart_path: Option<PathBuf>,
    values: Values,
    timeout: Duration,
}

impl ReleaseManager {
    /// Manager for installing or upgrading `request` from `chart_path`
    ///
    /// Fails with a validation error when the values text does not parse,
    /// so malformed values never reach the engine.
    pub fn new(
        engine: Arc<dyn PackagingEngine>,
        request: &ReleaseRequest,
        chart_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let values = Values::parse_overrides(request.spec.values.as_deref())?;
        let identity = request.identity();
        Ok(Self {
            engine,
            release_name: request.effective_release_name(),
            namespace: identity.namespace,
            owner: request.owner(),
            chart_path: Some(chart_path.into()),
            values,
            timeout: DEFAULT_ENGINE_TIMEOUT,
        })
    }

    /// Manager for an already validated request
    pub fn from_validated(
        engine: Arc<dyn PackagingEngine>,
        request: &ValidatedRequest,
        owner: ReleaseOwner,
        chart_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            release_name: request.release_name.clone(),
            namespace: request.identity.namespace.clone(),
            owner,
            chart_path: Some(chart_path.into()),
            values: request.values.clone(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    /// Manager for tearing down the release of a deleted request
    ///
    /// Acts on the bound release name and needs neither chart nor values.
    pub fn for_deletion(engine: Arc<dyn PackagingEngine>, request: &ReleaseRequest) -> Self {
        Self {
            engine,
            release_name: request.teardown_release_name(),
            namespace: request.identity().namespace,
            owner: request.owner(),
            chart_path: None,
            values: Values::new(),
            timeout: DEFAULT_ENGINE_TIMEOUT,
        }
    }

    /// Bound the time the engine may spend on install or upgrade
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    /// Whether any release holds the name, owned or not
    pub async fn exists(&self) -> Result<bool> {
        self.engine.exists(&self.namespace, &self.release_name).await
    }

    /// Look the release up and classify its ownership
    pub async fn state(&self) -> Result<ReleaseState> {
        let found = self
            .engine
            .find_release(&self.namespace, &self.release_name)
            .await?;
        Ok(match found {
            None => ReleaseState::Absent,
            Some(release) if release.is_owned_by(&self.owner.identity) => {
                ReleaseState::Owned(release)
            }
            Some(release) => ReleaseState::Foreign(release),
        })
    }

    /// Create the release
    pub async fn install(&self) -> Result<EngineRelease> {
        match self.state().await? {
            ReleaseState::Absent => self.engine.install(&self.target()?).await,
            ReleaseState::Owned(_) => Err(KubeError::ReleaseAlreadyExists {
                name: self.release_name.clone(),
                namespace: self.namespace.clone(),
            }),
            ReleaseState::Foreign(existing) => Err(self.conflict(&existing)),
        }
    }

    /// Re-apply chart and values to the owned release
    ///
    /// Always calls the engine, even when nothing changed; the engine
    /// decides whether a new revision is needed.
    pub async fn upgrade(&self) -> Result<EngineRelease> {
        match self.state().await? {
            ReleaseState::Owned(_) => self.engine.upgrade(&self.target()?).await,
            ReleaseState::Absent => Err(KubeError::ReleaseNotFound {
                name: self.release_name.clone(),
                namespace: self.namespace.clone(),
            }),
            ReleaseState::Foreign(existing) => Err(self.conflict(&existing)),
        }
    }

    /// Remove the owned release. Returns `false` when there was nothing of
    /// ours to remove; a release held by someone else is left alone.
    pub async fn uninstall(&self) -> Result<bool> {
        match self.state().await? {
            ReleaseState::Absent => Ok(false),
            ReleaseState::Owned(_) => {
                self.engine
                    .uninstall(&self.namespace, &self.release_name)
                    .await
            }
            ReleaseState::Foreign(existing) => {
                tracing::warn!(
                    release = %self.release_name,
                    request = %self.owner.identity,
                    owner = ?existing.owner,
                    "release belongs to another owner, leaving it installed"
                );
                Ok(false)
            }
        }
    }

    /// Name conflict error for a release held by someone else
    pub fn conflict(&self, existing: &EngineRelease) -> KubeError {
        KubeError::NameConflict {
            name: self.release_name.clone(),
            namespace: self.namespace.clone(),
            owner: existing
                .owner
                .as_ref()
                .map(|o| o.to_string())
                .unwrap_or_else(|| "a release not managed by chartsync".to_string()),
        }
    }

    fn target(&self) -> Result<ReleaseTarget> {
        let chart_path = self.chart_path.clone().ok_or_else(|| {
            KubeError::Validation(format!(
                "no chart resolved for release '{}'",
                self.release_name
            ))
        })?;
        Ok(ReleaseTarget {
            name: self.release_name.clone(),
            namespace: self.namespace.clone(),
            chart_path,
            values: self.values.clone(),
            owner: self.owner.clone(),
            timeout: self.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ReleaseRequestSpec;
    use crate::engine::MockEngine;
    use chartsync_core::SourceSpec;
    use std::path::Path;
    use tempfile::TempDir;

    fn chart(dir: &Path) {
        std::fs::write(dir.join("Chart.yaml"), "name: sample\nversion: 0.1.0\n").unwrap();
    }

    fn request(name: &str, values: Option<&str>) -> ReleaseRequest {
        let mut rr = ReleaseRequest::new(
            name,
            ReleaseRequestSpec {
                source: Some(SourceSpec::helm_repo(vec![
                    "https://charts.example.com/sample.tgz".to_string(),
                ])),
                release_name: String::new(),
                chart_name: "sample".to_string(),
                values: values.map(String::from),
            },
        );
        rr.metadata.namespace = Some("default".to_string());
        rr.metadata.uid = Some(format!("uid-{}", name));
        rr
    }

    #[test]
    fn test_malformed_values_rejected() {
        let engine = Arc::new(MockEngine::new());
        let result = ReleaseManager::new(engine.clone(), &request("a", Some("l1:\nl2")), "/tmp");
        assert!(matches!(result, Err(KubeError::Validation(_))));

        let manager = ReleaseManager::new(engine, &request("a", Some("l1: v1")), "/tmp").unwrap();
        assert_eq!(manager.release_name(), "a");
    }

    #[tokio::test]
    async fn test_install_then_upgrade() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = Arc::new(MockEngine::new());
        let manager =
            ReleaseManager::new(engine.clone(), &request("a", None), temp.path()).unwrap();

        assert!(!manager.exists().await.unwrap());
        assert!(matches!(
            manager.upgrade().await,
            Err(KubeError::ReleaseNotFound { .. })
        ));

        manager.install().await.unwrap();
        assert!(manager.exists().await.unwrap());
        assert!(matches!(manager.state().await.unwrap(), ReleaseState::Owned(_)));
        assert!(matches!(
            manager.install().await,
            Err(KubeError::ReleaseAlreadyExists { .. })
        ));

        manager.upgrade().await.unwrap();
        assert_eq!(engine.operation_counts().upgrades, 1);
        assert_eq!(engine.last_timeout(), Some(DEFAULT_ENGINE_TIMEOUT));

        let manager = manager.with_timeout(Duration::from_secs(42));
        manager.upgrade().await.unwrap();
        assert_eq!(engine.last_timeout(), Some(Duration::from_secs(42)));
    }

    #[tokio::test]
    async fn test_foreign_release_is_a_conflict() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = Arc::new(MockEngine::new());

        let first = ReleaseManager::new(engine.clone(), &request("a", None), temp.path()).unwrap();
        first.install().await.unwrap();

        let mut rr = request("b", None);
        rr.spec.release_name = "a".to_string();
        let second = ReleaseManager::new(engine.clone(), &rr, temp.path()).unwrap();

        assert!(second.exists().await.unwrap());
        assert!(matches!(second.state().await.unwrap(), ReleaseState::Foreign(_)));
        let err = second.install().await.unwrap_err();
        assert!(matches!(err, KubeError::NameConflict { ref owner, .. } if owner == "default/a"));
        assert!(matches!(second.upgrade().await, Err(KubeError::NameConflict { .. })));

        // Teardown of the second request must not touch the first release
        assert!(!ReleaseManager::for_deletion(engine.clone(), &rr).uninstall().await.unwrap());
        assert!(engine.release("default", "a").is_some());
        assert_eq!(engine.operation_counts().installs, 1);
    }

    #[tokio::test]
    async fn test_deletion_manager_uses_bound_name() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = Arc::new(MockEngine::new());
        let rr = request("a", None);
        ReleaseManager::new(engine.clone(), &rr, temp.path())
            .unwrap()
            .install()
            .await
            .unwrap();

        let mut renamed = rr.clone();
        renamed.spec.release_name = "b".to_string();
        renamed.metadata.annotations = Some(
            [(crate::crd::RELEASE_NAME_ANNOTATION.to_string(), "a".to_string())].into(),
        );
        let manager = ReleaseManager::for_deletion(engine.clone(), &renamed);
        assert_eq!(manager.release_name(), "a");
        assert!(manager.install().await.is_err());

        assert!(manager.uninstall().await.unwrap());
        assert!(!manager.uninstall().await.unwrap());
        assert_eq!(engine.release_count(), 0);
    }
}
