//! Packaging engine backed by the `helm` binary
//!
//! Releases are driven through `helm status|install|upgrade|uninstall`.
//! Next to every release chartsync keeps a ledger Secret carrying the
//! owner correlation and an owner reference to the release request, so
//! deleting the request garbage-collects it.

use async_trait::async_trait;
use chartsync_core::{RequestIdentity, Values};
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use super::{EngineRelease, PackagingEngine, ReleaseTarget, ledger_name, owner_from_meta};
use crate::crd::FIELD_MANAGER;
use crate::error::{KubeError, Result};

/// Helm output that points at the chart or the values rather than the cluster
static PERMANENT_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(parse error|error converting YAML|template: |values don't meet the specifications|chart requires kubeVersion|Chart\.yaml file is missing|validation: chart\.metadata)",
    )
    .expect("valid regex")
});

/// Release object printed by `helm ... -o json`
#[derive(Debug, Deserialize)]
struct HelmRelease {
    name: String,
    namespace: String,
    version: u32,
    #[serde(default)]
    chart: Option<HelmChart>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HelmChart {
    metadata: HelmChartMetadata,
}

#[derive(Debug, Deserialize)]
struct HelmChartMetadata {
    name: String,
    version: String,
}

/// Packaging engine running the `helm` CLI
#[derive(Clone)]
pub struct HelmCliEngine {
    client: Client,
    binary: PathBuf,
}

impl HelmCliEngine {
    pub fn new(client: Client, binary: impl Into<PathBuf>) -> Self {
        Self {
            client,
            binary: binary.into(),
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn helm(&self, args: &[String]) -> Result<Output> {
        tracing::debug!(binary = %self.binary.display(), ?args, "running helm");
        tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KubeError::Engine {
                message: format!("failed to run {}: {}", self.binary.display(), e),
                permanent: false,
            })
    }

    async fn owner_of(&self, namespace: &str, release: &str) -> Result<Option<RequestIdentity>> {
        let ledger = self.secrets(namespace).get_opt(&ledger_name(release)).await?;
        Ok(ledger.and_then(|s| owner_from_meta(&s.metadata)))
    }

    /// Write the ledger, refusing to take over one claimed by another request
    async fn claim_ledger(&self, target: &ReleaseTarget, chart: &str) -> Result<()> {
        if let Some(owner) = self.owner_of(&target.namespace, &target.name).await? {
            if owner != target.owner.identity {
                return Err(KubeError::NameConflict {
                    name: target.name.clone(),
                    namespace: target.namespace.clone(),
                    owner: owner.to_string(),
                });
            }
        }

        let ledger = target.owner.ledger(&target.name, &target.namespace, chart);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.secrets(&target.namespace)
            .patch(&ledger_name(&target.name), &params, &Patch::Apply(&ledger))
            .await?;
        Ok(())
    }

    async fn delete_ledger(&self, namespace: &str, release: &str) -> Result<()> {
        match self
            .secrets(namespace)
            .delete(&ledger_name(release), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `helm install` or `helm upgrade` for `target`
    async fn apply(&self, verb: &str, target: &ReleaseTarget) -> Result<EngineRelease> {
        let values_file = write_values(&target.values)?;

        let mut args = vec![
            verb.to_string(),
            target.name.clone(),
            target.chart_path.display().to_string(),
            "--namespace".to_string(),
            target.namespace.clone(),
            "--timeout".to_string(),
            duration_arg(target.timeout),
            "--output".to_string(),
            "json".to_string(),
        ];
        if verb == "upgrade" {
            args.push("--reset-values".to_string());
        }
        if let Some(file) = &values_file {
            args.push("--values".to_string());
            args.push(file.path().display().to_string());
        }

        let output = self.helm(&args).await?;
        if !output.status.success() {
            return Err(classify_failure(&output));
        }

        let release: HelmRelease = serde_json::from_slice(&output.stdout)?;
        Ok(to_engine_release(release, Some(target.owner.identity.clone())))
    }
}

/// Go-style duration for `--timeout`
fn duration_arg(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis())
}

fn write_values(values: &Values) -> Result<Option<tempfile::NamedTempFile>> {
    if values.is_empty() {
        return Ok(None);
    }
    let mut file = tempfile::Builder::new()
        .prefix("chartsync-values-")
        .suffix(".yaml")
        .tempfile()?;
    file.write_all(values.to_yaml()?.as_bytes())?;
    file.flush()?;
    Ok(Some(file))
}

fn classify_failure(output: &Output) -> KubeError {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    KubeError::Engine {
        permanent: PERMANENT_FAILURE.is_match(&stderr),
        message: stderr,
    }
}

fn is_not_found(output: &Output) -> bool {
    String::from_utf8_lossy(&output.stderr).contains("not found")
}

fn to_engine_release(release: HelmRelease, owner: Option<RequestIdentity>) -> EngineRelease {
    let chart = release
        .chart
        .map(|c| format!("{}-{}", c.metadata.name, c.metadata.version))
        .unwrap_or_default();
    EngineRelease {
        name: release.name,
        namespace: release.namespace,
        revision: release.version,
        chart,
        owner,
        values: Values(
            release
                .config
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        ),
    }
}

#[async_trait]
impl PackagingEngine for HelmCliEngine {
    async fn find_release(&self, namespace: &str, name: &str) -> Result<Option<EngineRelease>> {
        let args = [
            "status".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.helm(&args).await?;
        if !output.status.success() {
            if is_not_found(&output) {
                return Ok(None);
            }
            return Err(classify_failure(&output));
        }

        let release: HelmRelease = serde_json::from_slice(&output.stdout)?;
        let owner = self.owner_of(namespace, name).await?;
        Ok(Some(to_engine_release(release, owner)))
    }

    async fn install(&self, target: &ReleaseTarget) -> Result<EngineRelease> {
        self.claim_ledger(target, "").await?;
        let release = self.apply("install", target).await?;
        self.claim_ledger(target, &release.chart).await?;
        tracing::info!(release = %release.name, revision = release.revision, "helm install complete");
        Ok(release)
    }

    async fn upgrade(&self, target: &ReleaseTarget) -> Result<EngineRelease> {
        let release = self.apply("upgrade", target).await?;
        self.claim_ledger(target, &release.chart).await?;
        tracing::info!(release = %release.name, revision = release.revision, "helm upgrade complete");
        Ok(release)
    }

    async fn uninstall(&self, namespace: &str, name: &str) -> Result<bool> {
        let args = [
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self.helm(&args).await?;
        let removed = if output.status.success() {
            true
        } else if is_not_found(&output) {
            false
        } else {
            return Err(classify_failure(&output));
        };

        self.delete_ledger(namespace, name).await?;
        Ok(removed)
    }
}
