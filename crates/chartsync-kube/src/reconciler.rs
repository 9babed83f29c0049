//! Reconciler for release requests
//!
//! Nothing is remembered between passes. Every pass reads the request,
//! looks at its deletion marker, validates it and asks the engine who owns
//! the release, then takes the first rule that applies:
//!
//! 1. request gone: nothing to do
//! 2. request deleting: uninstall the owned release, then drop the finalizer
//! 3. request invalid: record a `Failed` status, never touch the engine
//! 4. otherwise: resolve the chart, then install, upgrade or report a
//!    name conflict, and record the result
//!
//! Status is written once, at the end of an attempt that ran to completion.

use chartsync_core::{FailureKind, ReleaseStatus, RequestIdentity};
use chartsync_repo::SourceResolver;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::crd::{FINALIZER, RELEASE_NAME_ANNOTATION, ReleaseRequest};
use crate::engine::{EngineRelease, PackagingEngine};
use crate::error::{KubeError, Result};
use crate::gate::IdentityGate;
use crate::manager::{ReleaseManager, ReleaseState};
use crate::status::StatusRecorder;
use crate::store::RecordStore;

/// Upper bound on the slack kept between the engine timeout and the deadline
const ENGINE_MARGIN: Duration = Duration::from_secs(10);

/// Timing knobs for reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Upper bound for one attempt, resolution and engine calls included
    pub deadline: Duration,
    /// Requeue delay after a successful attempt
    pub resync_interval: Duration,
    /// Requeue delay after a transient failure
    pub retry_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            resync_interval: Duration::from_secs(600),
            retry_interval: Duration::from_secs(30),
        }
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Retrying the unchanged request cannot help
    pub permanent: bool,
    pub reason: String,
}

impl Failure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            permanent: kind.is_permanent(),
            reason: reason.into(),
        }
    }

    /// Classify a crate error
    pub fn from_error(err: &KubeError) -> Self {
        let kind = match err {
            KubeError::Validation(_) | KubeError::ReleaseNameImmutable { .. } => {
                FailureKind::ValidationError
            }
            KubeError::Source(_) => FailureKind::SourceUnavailable,
            KubeError::NameConflict { .. } => FailureKind::NameConflict,
            e if e.is_conflict() || e.is_not_found() => FailureKind::PersistenceConflict,
            _ => FailureKind::EngineError,
        };
        Self {
            kind,
            permanent: err.is_permanent(),
            reason: err.to_string(),
        }
    }
}

/// Result of one completed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The request no longer exists
    Absent,
    /// Nothing was left for this controller to do
    NoOp,
    /// The release was torn down and the finalizer removed
    Uninstalled { release: String, removed: bool },
    Installed { release: String, revision: u32 },
    Upgraded { release: String, revision: u32 },
    Failed(Failure),
}

/// When the request should be looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Resync,
    Retry,
    AwaitChange,
}

impl Outcome {
    pub fn requeue(&self) -> Requeue {
        match self {
            Outcome::Installed { .. } | Outcome::Upgraded { .. } => Requeue::Resync,
            Outcome::Failed(f) if !f.permanent => Requeue::Retry,
            _ => Requeue::AwaitChange,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    fn persistence(err: &KubeError) -> Self {
        Outcome::Failed(Failure {
            kind: FailureKind::PersistenceConflict,
            permanent: false,
            reason: err.to_string(),
        })
    }
}

/// Converges release requests toward installed releases
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn SourceResolver>,
    engine: Arc<dyn PackagingEngine>,
    recorder: StatusRecorder,
    gate: IdentityGate,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn SourceResolver>,
        engine: Arc<dyn PackagingEngine>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            recorder: StatusRecorder::new(store.clone()),
            store,
            resolver,
            engine,
            gate: IdentityGate::new(),
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one attempt for `identity`
    ///
    /// Per-request failures come back as [`Outcome::Failed`]. `Err` is
    /// reserved for failing to read the request and for the deadline
    /// expiring; in both cases no status is written.
    #[instrument(skip_all, fields(request = %identity))]
    pub async fn reconcile(&self, identity: &RequestIdentity) -> Result<Outcome> {
        let _guard = self.gate.acquire(identity).await;

        let deadline = Instant::now() + self.config.deadline;
        match tokio::time::timeout_at(deadline, self.attempt(identity, deadline)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline = ?self.config.deadline, "reconciliation deadline expired");
                Err(self.timeout())
            }
        }
    }

    async fn attempt(&self, identity: &RequestIdentity, deadline: Instant) -> Result<Outcome> {
        let Some(record) = self.store.get(identity).await? else {
            debug!("release request not found, nothing to do");
            return Ok(Outcome::Absent);
        };

        if record.is_deleting() {
            return self.teardown(record).await;
        }

        let validated = match record.validate() {
            Ok(validated) => validated,
            Err(err) => {
                warn!(error = %err, "release request is invalid");
                return self.fail(&record, &err, &record.effective_release_name()).await;
            }
        };
        let release = validated.release_name.clone();

        let record = match self.ensure_finalizer(&record).await {
            Ok(updated) => updated,
            Err(err) if err.is_conflict() || err.is_not_found() => {
                debug!(error = %err, "finalizer write lost a race");
                return self.fail(&record, &err, &release).await;
            }
            Err(err) => return Err(err),
        };

        let chart_path = match self
            .resolver
            .resolve(&validated.source, &validated.chart_name)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                let err = KubeError::from(err);
                warn!(chart = %validated.chart_name, error = %err, "chart source unavailable");
                return self.fail(&record, &err, &release).await;
            }
        };

        let manager = ReleaseManager::from_validated(
            self.engine.clone(),
            &validated,
            record.owner(),
            chart_path,
        )
        .with_timeout(self.engine_timeout(deadline)?);

        let applied = match manager.state().await {
            Ok(ReleaseState::Absent) => manager.install().await.map(|r| (true, r)),
            Ok(ReleaseState::Owned(_)) => manager.upgrade().await.map(|r| (false, r)),
            Ok(ReleaseState::Foreign(existing)) => Err(manager.conflict(&existing)),
            Err(err) => Err(err),
        };

        let (installed, applied) = match applied {
            Ok(applied) => applied,
            Err(err) => {
                warn!(release = %release, error = %err, "release not converged");
                return self.fail(&record, &err, &release).await;
            }
        };

        let record = match self.bind_release_name(&record, &release).await {
            Ok(updated) => updated,
            Err(err) if err.is_conflict() || err.is_not_found() => {
                warn!(release = %release, error = %err, "release name binding lost a race");
                return self.fail(&record, &err, &release).await;
            }
            Err(err) => return Err(err),
        };

        let (status, outcome) = converged(installed, applied);
        info!(release = %release, state = ?outcome, "release converged");
        self.finish(&record, status, outcome).await
    }

    /// Rule 2: tear down the release, then let the request go
    async fn teardown(&self, record: ReleaseRequest) -> Result<Outcome> {
        if !record.has_finalizer() {
            debug!("request is deleting without our finalizer, nothing to clean up");
            return Ok(Outcome::NoOp);
        }

        let manager = ReleaseManager::for_deletion(self.engine.clone(), &record);
        let release = manager.release_name().to_string();

        let removed = match manager.uninstall().await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(release = %release, error = %err, "uninstall failed, finalizer kept");
                // Deletion stays pending until the release is gone
                let failure = Failure {
                    permanent: false,
                    ..Failure::from_error(&err)
                };
                let status = failure_status(&failure, &release);
                return self.finish(&record, status, Outcome::Failed(failure)).await;
            }
        };

        let mut updated = record;
        updated.finalizers_mut().retain(|f| f != FINALIZER);
        match self.store.update(&updated).await {
            Ok(_) => {
                info!(release = %release, removed, "release torn down");
                Ok(Outcome::Uninstalled { release, removed })
            }
            Err(err) if err.is_not_found() => Ok(Outcome::Uninstalled { release, removed }),
            Err(err) if err.is_conflict() => Ok(Outcome::persistence(&err)),
            Err(err) => Err(err),
        }
    }

    async fn ensure_finalizer(&self, record: &ReleaseRequest) -> Result<ReleaseRequest> {
        if record.has_finalizer() {
            return Ok(record.clone());
        }
        let mut updated = record.clone();
        updated.finalizers_mut().push(FINALIZER.to_string());
        let updated = self.store.update(&updated).await?;
        debug!("finalizer added");
        Ok(updated)
    }

    /// Record the release name on the request after its first success
    async fn bind_release_name(
        &self,
        record: &ReleaseRequest,
        release: &str,
    ) -> Result<ReleaseRequest> {
        if record.bound_release_name().as_deref() == Some(release) {
            return Ok(record.clone());
        }
        let mut updated = record.clone();
        updated
            .annotations_mut()
            .insert(RELEASE_NAME_ANNOTATION.to_string(), release.to_string());
        self.store.update(&updated).await
    }

    /// Time the engine may spend, leaving room to report before the deadline
    fn engine_timeout(&self, deadline: Instant) -> Result<Duration> {
        let margin = (self.config.deadline / 10).min(ENGINE_MARGIN);
        let left = deadline
            .saturating_duration_since(Instant::now())
            .saturating_sub(margin);
        if left.is_zero() {
            return Err(self.timeout());
        }
        Ok(left)
    }

    fn timeout(&self) -> KubeError {
        KubeError::Timeout(format!("{:?}", self.config.deadline))
    }

    /// Record a failed attempt
    async fn fail(
        &self,
        record: &ReleaseRequest,
        err: &KubeError,
        release: &str,
    ) -> Result<Outcome> {
        let failure = Failure::from_error(err);
        let status = failure_status(&failure, release);
        self.finish(record, status, Outcome::Failed(failure)).await
    }

    /// Write the status of a completed attempt
    ///
    /// A failed write turns the outcome into a transient persistence failure.
    async fn finish(
        &self,
        record: &ReleaseRequest,
        status: ReleaseStatus,
        outcome: Outcome,
    ) -> Result<Outcome> {
        match self
            .recorder
            .record(&record.identity(), record.status.as_ref(), status)
            .await
        {
            Ok(_) => Ok(outcome),
            Err(err) => {
                warn!(error = %err, "status write failed");
                Ok(Outcome::persistence(&err))
            }
        }
    }
}

fn failure_status(failure: &Failure, release: &str) -> ReleaseStatus {
    ReleaseStatus::failed(failure.kind, failure.reason.clone()).with_release_name(release)
}

fn converged(installed: bool, release: EngineRelease) -> (ReleaseStatus, Outcome) {
    // Same reason on every pass, so a steady state stops producing writes
    let status = ReleaseStatus::success(
        release.name.clone(),
        format!("release '{}' deployed", release.name),
    );
    let outcome = if installed {
        Outcome::Installed {
            release: release.name,
            revision: release.revision,
        }
    } else {
        Outcome::Upgraded {
            release: release.name,
            revision: release.revision,
        }
    };
    (status, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartsync_repo::RepoError;

    #[test]
    fn test_failure_classification() {
        let f = Failure::from_error(&KubeError::Validation("chartName is required".into()));
        assert_eq!(f.kind, FailureKind::ValidationError);
        assert!(f.permanent);

        let f = Failure::from_error(&KubeError::Source(RepoError::Timeout { seconds: 30 }));
        assert_eq!(f.kind, FailureKind::SourceUnavailable);
        assert!(!f.permanent);

        let f = Failure::from_error(&KubeError::NameConflict {
            name: "a".into(),
            namespace: "default".into(),
            owner: "default/b".into(),
        });
        assert_eq!(f.kind, FailureKind::NameConflict);
        assert!(f.permanent);

        let f = Failure::from_error(&KubeError::Engine {
            message: "template: bad".into(),
            permanent: true,
        });
        assert_eq!(f.kind, FailureKind::EngineError);
        assert!(f.permanent);

        let f = Failure::from_error(&KubeError::Conflict {
            identity: "default/a".into(),
        });
        assert_eq!(f.kind, FailureKind::PersistenceConflict);
        assert!(!f.permanent);
    }

    #[test]
    fn test_requeue_policy() {
        let installed = Outcome::Installed {
            release: "a".into(),
            revision: 1,
        };
        assert_eq!(installed.requeue(), Requeue::Resync);
        assert!(installed.is_success());

        let transient = Outcome::Failed(Failure::new(FailureKind::SourceUnavailable, "offline"));
        assert_eq!(transient.requeue(), Requeue::Retry);

        let permanent = Outcome::Failed(Failure::new(FailureKind::NameConflict, "taken"));
        assert_eq!(permanent.requeue(), Requeue::AwaitChange);
        assert_eq!(Outcome::Absent.requeue(), Requeue::AwaitChange);
    }

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(300));
        assert_eq!(config.resync_interval, Duration::from_secs(600));
        assert_eq!(config.retry_interval, Duration::from_secs(30));
    }
}
