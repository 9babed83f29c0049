//! The `ReleaseRequest` custom resource
//!
//! A release request names a chart, where to fetch it from, the release it
//! should be installed as and optional override values. The controller
//! writes [`ReleaseStatus`] back through the status subresource.

use chartsync_core::{
    ChartSource, RequestIdentity, SourceSpec, Values, validate_chart_name, validate_release_name,
};
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use chartsync_core::ReleaseStatus;

use crate::engine::ReleaseOwner;
use crate::error::{KubeError, Result};

/// API group of the custom resource
pub const API_GROUP: &str = "chartsync.io";

/// Finalizer that blocks deletion until the release is uninstalled
pub const FINALIZER: &str = "chartsync.io/release-cleanup";

/// Annotation recording the release name bound by the first successful install
pub const RELEASE_NAME_ANNOTATION: &str = "chartsync.io/release-name";

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "chartsync";

/// Desired state of one chart release
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "chartsync.io",
    version = "v1alpha1",
    kind = "ReleaseRequest",
    namespaced,
    status = "ReleaseStatus",
    shortname = "rr",
    printcolumn = r#"{"name":"Release","type":"string","jsonPath":".status.releaseName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","priority":1,"jsonPath":".status.reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequestSpec {
    /// Where the chart content comes from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceSpec>,

    /// Release name; defaults to the request name when empty
    #[serde(default)]
    pub release_name: String,

    /// Chart name, also the chart cache key
    #[serde(default)]
    pub chart_name: String,

    /// Override values as YAML text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

/// A request that passed static validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub identity: RequestIdentity,
    pub release_name: String,
    pub chart_name: String,
    pub source: ChartSource,
    pub values: Values,
}

impl ReleaseRequest {
    /// Namespace and name of the request
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Declared release name, defaulting to the request name
    pub fn effective_release_name(&self) -> String {
        let declared = self.spec.release_name.trim();
        if declared.is_empty() {
            self.name_any()
        } else {
            declared.to_string()
        }
    }

    /// Release name recorded by a previous successful install
    pub fn bound_release_name(&self) -> Option<String> {
        self.annotations()
            .get(RELEASE_NAME_ANNOTATION)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Release name teardown should act on
    pub fn teardown_release_name(&self) -> String {
        self.bound_release_name()
            .unwrap_or_else(|| self.effective_release_name())
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Owner correlation for releases and side-effect artifacts
    pub fn owner(&self) -> ReleaseOwner {
        ReleaseOwner::new(self.identity(), self.uid())
    }

    /// Check everything that can be checked without I/O
    ///
    /// Covers required fields, source shape, names, values syntax and the
    /// bound release name.
    pub fn validate(&self) -> Result<ValidatedRequest> {
        if self.spec.chart_name.trim().is_empty() {
            return Err(KubeError::Validation("chartName is required".to_string()));
        }
        validate_chart_name(&self.spec.chart_name)?;

        let source = self
            .spec
            .source
            .as_ref()
            .ok_or_else(|| KubeError::Validation("source is required".to_string()))?
            .to_source()?;

        let release_name = self.effective_release_name();
        validate_release_name(&release_name)?;

        if let Some(bound) = self.bound_release_name() {
            if bound != release_name {
                return Err(KubeError::ReleaseNameImmutable {
                    bound,
                    requested: release_name,
                });
            }
        }

        let values = Values::parse_overrides(self.spec.values.as_deref())?;

        Ok(ValidatedRequest {
            identity: self.identity(),
            release_name,
            chart_name: self.spec.chart_name.clone(),
            source,
            values,
        })
    }
}
