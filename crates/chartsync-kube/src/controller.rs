//! Watch loop driving the reconciler
//!
//! The kube-runtime controller delivers one notification per changed
//! request (and per requeue) and never runs two reconciliations for the
//! same object at once.

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::crd::ReleaseRequest;
use crate::error::{KubeError, Result};
use crate::reconciler::{Outcome, Reconciler, ReconcilerConfig, Requeue};

/// Shared state handed to every reconciliation
pub struct Context {
    pub reconciler: Arc<Reconciler>,
}

/// Requeue action for a completed attempt
pub fn action_for(outcome: &Outcome, config: &ReconcilerConfig) -> Action {
    match outcome.requeue() {
        Requeue::Resync => Action::requeue(config.resync_interval),
        Requeue::Retry => Action::requeue(config.retry_interval),
        Requeue::AwaitChange => Action::await_change(),
    }
}

async fn reconcile(request: Arc<ReleaseRequest>, ctx: Arc<Context>) -> Result<Action> {
    let outcome = ctx.reconciler.reconcile(&request.identity()).await?;
    if let Some(failure) = outcome.failure() {
        debug!(
            request = %request.name_any(),
            kind = %failure.kind,
            permanent = failure.permanent,
            "attempt failed"
        );
    }
    Ok(action_for(&outcome, ctx.reconciler.config()))
}

/// Called when an attempt could not complete (unreadable request or deadline)
pub fn error_policy(request: Arc<ReleaseRequest>, error: &KubeError, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        request = %request.identity(),
        "reconciliation failed"
    );
    Action::requeue(ctx.reconciler.config().retry_interval)
}

/// Watch release requests and reconcile them until a shutdown signal
///
/// Watches one namespace when given, otherwise the whole cluster.
pub async fn run(
    client: Client,
    namespace: Option<String>,
    reconciler: Arc<Reconciler>,
) -> Result<()> {
    let api: Api<ReleaseRequest> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    // Fail fast when the CRD is not installed
    api.list(&ListParams::default().limit(1)).await?;

    info!(namespace = namespace.as_deref().unwrap_or("*"), "watching release requests");

    let ctx = Arc::new(Context { reconciler });
    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(request = %object.name, ?action, "reconciled"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;

    info!("controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::Failure;
    use chartsync_core::FailureKind;
    use std::time::Duration;

    #[test]
    fn test_action_for_outcomes() {
        let config = ReconcilerConfig {
            deadline: Duration::from_secs(60),
            resync_interval: Duration::from_secs(120),
            retry_interval: Duration::from_secs(5),
        };

        let installed = Outcome::Installed {
            release: "a".into(),
            revision: 1,
        };
        assert_eq!(action_for(&installed, &config), Action::requeue(Duration::from_secs(120)));

        let transient = Outcome::Failed(Failure::new(FailureKind::EngineError, "unreachable"));
        assert_eq!(action_for(&transient, &config), Action::requeue(Duration::from_secs(5)));

        let invalid = Outcome::Failed(Failure::new(FailureKind::ValidationError, "bad"));
        assert_eq!(action_for(&invalid, &config), Action::await_change());
        assert_eq!(action_for(&Outcome::NoOp, &config), Action::await_change());
    }
}
