//! Observable status written back to a release request

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Outcome of the last completed reconciliation attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum StatusState {
    #[default]
    Unknown,
    Success,
    Failed,
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Success => "Success",
            Self::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum FailureKind {
    /// Static, data-derived defect in the request. Never retried.
    ValidationError,
    /// Chart content could not be fetched or materialized
    SourceUnavailable,
    /// The release name is held by a release this request does not own
    NameConflict,
    /// The packaging engine failed
    EngineError,
    /// Optimistic-concurrency failure writing the request
    PersistenceConflict,
}

impl FailureKind {
    /// Whether another attempt on the unchanged request can succeed
    ///
    /// Engine errors are transient unless the engine itself reported a
    /// permanent condition; that distinction is carried by the caller.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::ValidationError | Self::NameConflict)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationError => "ValidationError",
            Self::SourceUnavailable => "SourceUnavailable",
            Self::NameConflict => "NameConflict",
            Self::EngineError => "EngineError",
            Self::PersistenceConflict => "PersistenceConflict",
        };
        write!(f, "{}", s)
    }
}

/// Status subresource of a release request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default)]
    pub state: StatusState,

    /// Human-readable explanation of the state
    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// Release name used by the attempt that produced this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl ReleaseStatus {
    pub fn success(release_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            state: StatusState::Success,
            reason: reason.into(),
            failure_kind: None,
            release_name: Some(release_name.into()),
            last_transition_time: None,
        }
    }

    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            state: StatusState::Failed,
            reason: reason.into(),
            failure_kind: Some(kind),
            release_name: None,
            last_transition_time: None,
        }
    }

    pub fn with_release_name(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = Some(release_name.into());
        self
    }

    /// Stamp the transition time relative to the previously stored status.
    ///
    /// The time moves only when `state` changes; otherwise the previous
    /// timestamp is carried over.
    pub fn stamped(mut self, previous: Option<&ReleaseStatus>, now: DateTime<Utc>) -> Self {
        self.last_transition_time = match previous {
            Some(prev) if prev.state == self.state && prev.last_transition_time.is_some() => {
                prev.last_transition_time
            }
            _ => Some(now),
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_transition_time_kept_for_same_state() {
        let earlier = Utc::now() - Duration::minutes(5);
        let previous = ReleaseStatus::success("app", "installed").stamped(None, earlier);

        let next = ReleaseStatus::success("app", "upgraded").stamped(Some(&previous), Utc::now());
        assert_eq!(next.last_transition_time, Some(earlier));
    }

    #[test]
    fn test_transition_time_moves_on_state_change() {
        let earlier = Utc::now() - Duration::minutes(5);
        let previous = ReleaseStatus::success("app", "installed").stamped(None, earlier);

        let now = Utc::now();
        let next =
            ReleaseStatus::failed(FailureKind::EngineError, "boom").stamped(Some(&previous), now);
        assert_eq!(next.last_transition_time, Some(now));
    }

    #[test]
    fn test_permanent_kinds() {
        assert!(FailureKind::ValidationError.is_permanent());
        assert!(FailureKind::NameConflict.is_permanent());
        assert!(!FailureKind::SourceUnavailable.is_permanent());
        assert!(!FailureKind::EngineError.is_permanent());
        assert!(!FailureKind::PersistenceConflict.is_permanent());
    }

    #[test]
    fn test_yaml_snapshot() {
        let status = ReleaseStatus::failed(FailureKind::SourceUnavailable, "chart path not found")
            .with_release_name("sample");
        insta::assert_snapshot!(serde_yaml::to_string(&status).unwrap(), @r###"
        state: Failed
        reason: chart path not found
        failureKind: SourceUnavailable
        releaseName: sample
        "###);
    }

    #[test]
    fn test_serialized_shape() {
        let status = ReleaseStatus::failed(FailureKind::NameConflict, "taken");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Failed");
        assert_eq!(json["failureKind"], "NameConflict");
        assert!(json.get("releaseName").is_none());
    }
}
