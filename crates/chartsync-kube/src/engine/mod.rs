//! Packaging engine capability
//!
//! The reconciler only needs four things from the engine that renders and
//! installs charts: look a release up, install it, upgrade it and remove it.
//! [`HelmCliEngine`] drives the real `helm` binary; [`MockEngine`] keeps
//! releases in memory for tests.
//!
//! Ownership is correlated through the metadata of the release's
//! side-effect artifact (a ledger Secret), never by release name alone.

mod helm;
mod mock;

pub use helm::HelmCliEngine;
pub use mock::{EngineOp, EngineOperationCounts, MockEngine};

use async_trait::async_trait;
use chartsync_core::{RequestIdentity, Values};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::crd::API_GROUP;
use crate::error::Result;

/// Label identifying resources managed by chartsync
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "chartsync";
/// Release the artifact belongs to
pub const RELEASE_LABEL: &str = "chartsync.io/release";
/// `namespace/name` of the owning release request. An annotation because
/// request names may exceed the label value limit.
pub const OWNER_ANNOTATION: &str = "chartsync.io/owner";

/// Name of the ledger Secret kept for a release
pub fn ledger_name(release: &str) -> String {
    format!("sh.chartsync.release.v1.{}", release)
}

/// Release request that owns a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOwner {
    pub identity: RequestIdentity,
    /// Object uid, needed for owner references
    pub uid: Option<String>,
}

impl ReleaseOwner {
    pub fn new(identity: RequestIdentity, uid: Option<String>) -> Self {
        Self { identity, uid }
    }

    /// Labels for artifacts of `release`
    pub fn labels(&self, release: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
            (RELEASE_LABEL.to_string(), release.to_string()),
        ])
    }

    /// Owner-correlation annotations
    pub fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(OWNER_ANNOTATION.to_string(), self.identity.to_string())])
    }

    /// Owner reference back to the release request, when its uid is known
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let uid = self.uid.clone()?;
        Some(OwnerReference {
            api_version: format!("{}/v1alpha1", API_GROUP),
            kind: "ReleaseRequest".to_string(),
            name: self.identity.name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    /// Build the ledger Secret for `release`
    pub fn ledger(&self, release: &str, namespace: &str, chart: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(ledger_name(release)),
                namespace: Some(namespace.to_string()),
                labels: Some(self.labels(release)),
                annotations: Some(self.annotations()),
                owner_references: self.owner_reference().map(|r| vec![r]),
                ..Default::default()
            },
            type_: Some("chartsync.io/release-ledger.v1".to_string()),
            data: Some(BTreeMap::from([
                ("release".to_string(), ByteString(release.as_bytes().to_vec())),
                ("chart".to_string(), ByteString(chart.as_bytes().to_vec())),
            ])),
            ..Default::default()
        }
    }
}

/// Recover the owning request from an artifact's metadata
pub fn owner_from_meta(meta: &ObjectMeta) -> Option<RequestIdentity> {
    let managed = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(MANAGED_BY_LABEL))
        .is_some_and(|v| v == MANAGED_BY_VALUE);
    if !managed {
        return None;
    }
    meta.annotations
        .as_ref()?
        .get(OWNER_ANNOTATION)?
        .parse()
        .ok()
}

/// A release as reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRelease {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    /// `<chart name>-<chart version>`
    pub chart: String,
    /// Request owning the release; `None` for releases chartsync never claimed
    pub owner: Option<RequestIdentity>,
    /// User-supplied values of the current revision
    pub values: Values,
}

impl EngineRelease {
    pub fn is_owned_by(&self, identity: &RequestIdentity) -> bool {
        self.owner.as_ref() == Some(identity)
    }
}

/// Everything the engine needs to install or upgrade one release
#[derive(Debug, Clone)]
pub struct ReleaseTarget {
    pub name: String,
    pub namespace: String,
    pub chart_path: PathBuf,
    pub values: Values,
    pub owner: ReleaseOwner,
    /// How long the engine may wait for the release to settle
    pub timeout: Duration,
}

/// Narrow interface over the packaging engine
#[async_trait]
pub trait PackagingEngine: Send + Sync {
    /// Look a release up; `Ok(None)` means it does not exist
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<EngineRelease>>;

    /// Create a new release
    async fn install(&self, target: &ReleaseTarget) -> Result<EngineRelease>;

    /// Re-apply chart and values to an existing release
    async fn upgrade(&self, target: &ReleaseTarget) -> Result<EngineRelease>;

    /// Remove a release. Returns `false` when it did not exist.
    async fn uninstall(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Check if a release exists
    async fn exists(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.find_release(namespace, name).await?.is_some())
    }
}
