//! Mock packaging engine for testing
//!
//! Keeps releases and their ledger Secrets in memory, useful for
//! reconciler tests without a cluster or a `helm` binary.

use async_trait::async_trait;
use chartsync_core::LoadedChart;
use k8s_openapi::api::core::v1::Secret;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{EngineRelease, PackagingEngine, ReleaseTarget, ledger_name};
use crate::error::{KubeError, Result};

type Key = (String, String);

/// Engine operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Find,
    Install,
    Upgrade,
    Uninstall,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineOperationCounts {
    pub finds: usize,
    pub installs: usize,
    pub upgrades: usize,
    pub uninstalls: usize,
}

#[derive(Debug, Clone)]
struct StoredRelease {
    release: EngineRelease,
    /// Digest of the chart tree the current revision was built from
    chart_digest: String,
}

/// In-memory packaging engine for testing
#[derive(Clone, Default)]
pub struct MockEngine {
    /// (namespace, name) -> release
    releases: Arc<RwLock<HashMap<Key, StoredRelease>>>,
    /// (namespace, secret name) -> side-effect artifact
    artifacts: Arc<RwLock<HashMap<Key, Secret>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<EngineOperationCounts>>,
    /// One-shot failures: op -> (message, permanent)
    failures: Arc<RwLock<HashMap<EngineOp, (String, bool)>>>,
    /// Timeout handed over with the last install or upgrade
    last_timeout: Arc<RwLock<Option<Duration>>>,
    /// Cut a new revision on every upgrade, as `helm upgrade` does
    revision_per_upgrade: bool,
}

impl MockEngine {
    /// Create a new empty mock engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-existing releases (e.g. installed by someone else)
    pub fn with_releases(releases: Vec<EngineRelease>) -> Self {
        let engine = Self::new();
        {
            let mut store = engine.releases.write().unwrap();
            for release in releases {
                store.insert(
                    (release.namespace.clone(), release.name.clone()),
                    StoredRelease {
                        release,
                        chart_digest: String::new(),
                    },
                );
            }
        }
        engine
    }

    /// Bump the revision on every upgrade, changed or not
    pub fn with_revision_per_upgrade(mut self) -> Self {
        self.revision_per_upgrade = true;
        self
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: EngineOp, message: impl Into<String>, permanent: bool) {
        self.failures
            .write()
            .unwrap()
            .insert(op, (message.into(), permanent));
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> EngineOperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = EngineOperationCounts::default();
    }

    /// Get a release without counting a find
    pub fn release(&self, namespace: &str, name: &str) -> Option<EngineRelease> {
        self.releases
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.release.clone())
    }

    /// Count all releases
    pub fn release_count(&self) -> usize {
        self.releases.read().unwrap().len()
    }

    /// Remove a release behind the controller's back
    pub fn forget(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        self.releases.write().unwrap().remove(&key);
        self.artifacts
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), ledger_name(name)));
    }

    /// Timeout passed with the most recent install or upgrade
    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.read().unwrap()
    }

    /// Side-effect artifact created for a release
    pub fn artifact(&self, namespace: &str, release: &str) -> Option<Secret> {
        self.artifacts
            .read()
            .unwrap()
            .get(&(namespace.to_string(), ledger_name(release)))
            .cloned()
    }

    fn record(&self, op: EngineOp) -> Result<()> {
        {
            let mut ops = self.operations.write().unwrap();
            match op {
                EngineOp::Find => ops.finds += 1,
                EngineOp::Install => ops.installs += 1,
                EngineOp::Upgrade => ops.upgrades += 1,
                EngineOp::Uninstall => ops.uninstalls += 1,
            }
        }

        match self.failures.write().unwrap().remove(&op) {
            Some((message, permanent)) => Err(KubeError::Engine { message, permanent }),
            None => Ok(()),
        }
    }

    fn load_chart(&self, target: &ReleaseTarget) -> Result<(String, String)> {
        *self.last_timeout.write().unwrap() = Some(target.timeout);

        let chart = LoadedChart::load(&target.chart_path).map_err(|e| KubeError::Engine {
            message: e.to_string(),
            permanent: true,
        })?;
        let digest = chart.content_digest().map_err(|e| KubeError::Engine {
            message: e.to_string(),
            permanent: false,
        })?;
        let name = format!("{}-{}", chart.metadata.name, chart.metadata.version);
        Ok((name, digest))
    }

    fn write_artifact(&self, target: &ReleaseTarget, chart: &str) {
        let secret = target.owner.ledger(&target.name, &target.namespace, chart);
        self.artifacts
            .write()
            .unwrap()
            .insert((target.namespace.clone(), ledger_name(&target.name)), secret);
    }
}

#[async_trait]
impl PackagingEngine for MockEngine {
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<EngineRelease>> {
        self.record(EngineOp::Find)?;
        Ok(self.release(namespace, name))
    }

    async fn install(&self, target: &ReleaseTarget) -> Result<EngineRelease> {
        self.record(EngineOp::Install)?;
        let (chart, chart_digest) = self.load_chart(target)?;

        let key = (target.namespace.clone(), target.name.clone());
        let mut releases = self.releases.write().unwrap();
        if releases.contains_key(&key) {
            return Err(KubeError::ReleaseAlreadyExists {
                name: target.name.clone(),
                namespace: target.namespace.clone(),
            });
        }

        let release = EngineRelease {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            revision: 1,
            chart: chart.clone(),
            owner: Some(target.owner.identity.clone()),
            values: target.values.clone(),
        };
        releases.insert(
            key,
            StoredRelease {
                release: release.clone(),
                chart_digest,
            },
        );
        drop(releases);

        self.write_artifact(target, &chart);
        Ok(release)
    }

    async fn upgrade(&self, target: &ReleaseTarget) -> Result<EngineRelease> {
        self.record(EngineOp::Upgrade)?;
        let (chart, chart_digest) = self.load_chart(target)?;

        let key = (target.namespace.clone(), target.name.clone());
        let mut releases = self.releases.write().unwrap();
        let stored = releases
            .get_mut(&key)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: target.name.clone(),
                namespace: target.namespace.clone(),
            })?;

        let unchanged = stored.chart_digest == chart_digest
            && stored.release.values == target.values
            && stored.release.chart == chart;
        if self.revision_per_upgrade || !unchanged {
            stored.release.revision += 1;
            stored.release.chart = chart.clone();
            stored.release.values = target.values.clone();
            stored.chart_digest = chart_digest;
        }
        let release = stored.release.clone();
        drop(releases);

        self.write_artifact(target, &chart);
        Ok(release)
    }

    async fn uninstall(&self, namespace: &str, name: &str) -> Result<bool> {
        self.record(EngineOp::Uninstall)?;
        let removed = self
            .releases
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        self.artifacts
            .write()
            .unwrap()
            .remove(&(namespace.to_string(), ledger_name(name)));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ReleaseOwner, owner_from_meta};
    use chartsync_core::{RequestIdentity, Values};
    use std::path::Path;
    use tempfile::TempDir;

    fn chart(dir: &Path) {
        std::fs::write(dir.join("Chart.yaml"), "name: sample\nversion: 0.1.0\n").unwrap();
    }

    fn target(dir: &Path, values: &str) -> ReleaseTarget {
        ReleaseTarget {
            name: "app".to_string(),
            namespace: "default".to_string(),
            chart_path: dir.to_path_buf(),
            values: Values::parse_overrides(Some(values)).unwrap(),
            owner: ReleaseOwner::new(RequestIdentity::new("default", "app"), Some("uid-1".into())),
            timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_install_upgrade_uninstall() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = MockEngine::new();

        let installed = engine.install(&target(temp.path(), "a: 1")).await.unwrap();
        assert_eq!(installed.revision, 1);
        assert_eq!(installed.chart, "sample-0.1.0");

        let same = engine.upgrade(&target(temp.path(), "a: 1")).await.unwrap();
        assert_eq!(same.revision, 1);

        let changed = engine.upgrade(&target(temp.path(), "a: 2")).await.unwrap();
        assert_eq!(changed.revision, 2);

        let artifact = engine.artifact("default", "app").unwrap();
        assert_eq!(
            owner_from_meta(&artifact.metadata),
            Some(RequestIdentity::new("default", "app"))
        );

        assert_eq!(engine.last_timeout(), Some(Duration::from_secs(60)));

        assert!(engine.uninstall("default", "app").await.unwrap());
        assert!(!engine.uninstall("default", "app").await.unwrap());
        assert!(engine.artifact("default", "app").is_none());

        let counts = engine.operation_counts();
        assert_eq!(counts.installs, 1);
        assert_eq!(counts.upgrades, 2);
        assert_eq!(counts.uninstalls, 2);
    }

    #[tokio::test]
    async fn test_revision_per_upgrade() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = MockEngine::new().with_revision_per_upgrade();

        engine.install(&target(temp.path(), "a: 1")).await.unwrap();
        engine.upgrade(&target(temp.path(), "a: 1")).await.unwrap();
        let again = engine.upgrade(&target(temp.path(), "a: 1")).await.unwrap();
        assert_eq!(again.revision, 3);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let temp = TempDir::new().unwrap();
        chart(temp.path());
        let engine = MockEngine::new();

        engine.fail_next(EngineOp::Install, "cluster unreachable", false);
        let err = engine.install(&target(temp.path(), "")).await.unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(engine.release_count(), 0);

        assert!(engine.install(&target(temp.path(), "")).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_chart_is_permanent() {
        let temp = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let err = engine.install(&target(temp.path(), "")).await.unwrap_err();
        assert!(err.is_permanent());
    }
}
