//! Chartsync Kube - Kubernetes integration for chartsync
//!
//! This crate converges `ReleaseRequest` resources toward installed chart
//! releases:
//! - `crd`: the `ReleaseRequest` custom resource and its static validation
//! - `engine`: the narrow packaging-engine capability (`helm` CLI and a mock)
//! - `store`: reading and writing requests (API server and a mock)
//! - `manager`: install / upgrade / uninstall with ownership checks
//! - `reconciler`: the per-request state machine
//! - `controller`: the kube-runtime watch loop
//!
//! # Example
//!
//! ```ignore
//! use chartsync_kube::{KubeRecordStore, HelmCliEngine, Reconciler, ReconcilerConfig};
//! use chartsync_repo::{CacheConfig, ChartResolver};
//!
//! let client = kube::Client::try_default().await?;
//! let reconciler = Reconciler::new(
//!     Arc::new(KubeRecordStore::new(client.clone())),
//!     Arc::new(ChartResolver::new(&CacheConfig::from_env())?),
//!     Arc::new(HelmCliEngine::new(client.clone(), "helm")),
//!     ReconcilerConfig::default(),
//! );
//! chartsync_kube::controller::run(client, None, Arc::new(reconciler)).await?;
//! ```

pub mod controller;
pub mod crd;
pub mod engine;
pub mod error;
pub mod gate;
pub mod manager;
pub mod reconciler;
pub mod status;
pub mod store;

pub use crd::{
    FINALIZER, RELEASE_NAME_ANNOTATION, ReleaseRequest, ReleaseRequestSpec, ValidatedRequest,
};
pub use engine::{
    EngineRelease, HelmCliEngine, MockEngine, PackagingEngine, ReleaseOwner, ReleaseTarget,
};
pub use error::{KubeError, Result};
pub use gate::IdentityGate;
pub use manager::{ReleaseManager, ReleaseState};
pub use reconciler::{Failure, Outcome, Reconciler, ReconcilerConfig, Requeue};
pub use status::StatusRecorder;
pub use store::{KubeRecordStore, MockRecordStore, RecordStore};
