//! Mock record store for testing
//!
//! Mimics the API server semantics the reconciler depends on: resource
//! versions bumped on every write, optimistic checks on `update`, and
//! deletion that only marks records still carrying finalizers.

use async_trait::async_trait;
use chartsync_core::{ReleaseStatus, RequestIdentity};
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::RecordStore;
use crate::crd::ReleaseRequest;
use crate::error::{KubeError, Result};

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreOperationCounts {
    pub gets: usize,
    pub updates: usize,
    pub status_updates: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<RequestIdentity, ReleaseRequest>,
    next_version: u64,
    next_uid: u64,
    conflict_update: bool,
    conflict_status: bool,
}

impl Inner {
    fn bump(&mut self, record: &mut ReleaseRequest) {
        self.next_version += 1;
        record.metadata.resource_version = Some(self.next_version.to_string());
    }
}

/// In-memory record store for testing
#[derive(Clone, Default)]
pub struct MockRecordStore {
    inner: Arc<RwLock<Inner>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<StoreOperationCounts>>,
}

impl MockRecordStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record as a user would, assigning uid and resourceVersion
    ///
    /// Records without a namespace land in `default`.
    pub fn create(&self, mut record: ReleaseRequest) -> Result<ReleaseRequest> {
        if record.metadata.namespace.is_none() {
            record.metadata.namespace = Some("default".to_string());
        }
        let identity = record.identity();

        let mut inner = self.inner.write().unwrap();
        if inner.records.contains_key(&identity) {
            return Err(KubeError::Conflict {
                identity: identity.to_string(),
            });
        }
        inner.next_uid += 1;
        record.metadata.uid = Some(format!("00000000-0000-0000-0000-{:012}", inner.next_uid));
        record.metadata.creation_timestamp = Some(Time(Utc::now()));
        record.status = None;
        inner.bump(&mut record);
        inner.records.insert(identity, record.clone());
        Ok(record)
    }

    /// Apply a user edit to a stored record
    pub fn edit(
        &self,
        identity: &RequestIdentity,
        edit: impl FnOnce(&mut ReleaseRequest),
    ) -> Option<ReleaseRequest> {
        let mut inner = self.inner.write().unwrap();
        let mut record = inner.records.get(identity)?.clone();
        edit(&mut record);
        inner.bump(&mut record);
        inner.records.insert(identity.clone(), record.clone());
        Some(record)
    }

    /// Delete a record. Records with finalizers only get a deletion
    /// timestamp. Returns `false` when the record did not exist.
    pub fn delete(&self, identity: &RequestIdentity) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(mut record) = inner.records.get(identity).cloned() else {
            return false;
        };

        let finalized = record
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if finalized {
            if record.metadata.deletion_timestamp.is_none() {
                record.metadata.deletion_timestamp = Some(Time(Utc::now()));
                inner.bump(&mut record);
                inner.records.insert(identity.clone(), record);
            }
        } else {
            inner.records.remove(identity);
        }
        true
    }

    /// Get a record without counting a read
    pub fn record(&self, identity: &RequestIdentity) -> Option<ReleaseRequest> {
        self.inner.read().unwrap().records.get(identity).cloned()
    }

    /// Current status of a record
    pub fn status(&self, identity: &RequestIdentity) -> Option<ReleaseStatus> {
        self.record(identity).and_then(|r| r.status)
    }

    /// Count all records
    pub fn record_count(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Make the next `update` fail with a conflict
    pub fn conflict_next_update(&self) {
        self.inner.write().unwrap().conflict_update = true;
    }

    /// Make the next `update_status` fail with a conflict
    pub fn conflict_next_status_update(&self) {
        self.inner.write().unwrap().conflict_status = true;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> StoreOperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = StoreOperationCounts::default();
    }
}

#[async_trait]
impl RecordStore for MockRecordStore {
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<ReleaseRequest>> {
        self.operations.write().unwrap().gets += 1;
        Ok(self.record(identity))
    }

    async fn update(&self, record: &ReleaseRequest) -> Result<ReleaseRequest> {
        self.operations.write().unwrap().updates += 1;
        let identity = record.identity();
        let conflict = || KubeError::Conflict {
            identity: identity.to_string(),
        };

        let mut inner = self.inner.write().unwrap();
        if std::mem::take(&mut inner.conflict_update) {
            return Err(conflict());
        }
        let stored = inner
            .records
            .get(&identity)
            .cloned()
            .ok_or_else(|| KubeError::RecordNotFound {
                identity: identity.to_string(),
            })?;
        if stored.metadata.resource_version != record.metadata.resource_version {
            return Err(conflict());
        }

        // Writes through the main resource never touch status, uid or the
        // deletion timestamp
        let mut updated = record.clone();
        updated.status = stored.status;
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        inner.bump(&mut updated);

        let released = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty());
        if released {
            inner.records.remove(&identity);
        } else {
            inner.records.insert(identity, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(
        &self,
        identity: &RequestIdentity,
        status: &ReleaseStatus,
    ) -> Result<()> {
        self.operations.write().unwrap().status_updates += 1;

        let mut inner = self.inner.write().unwrap();
        if std::mem::take(&mut inner.conflict_status) {
            return Err(KubeError::Conflict {
                identity: identity.to_string(),
            });
        }
        let mut record = inner
            .records
            .get(identity)
            .cloned()
            .ok_or_else(|| KubeError::RecordNotFound {
                identity: identity.to_string(),
            })?;
        record.status = Some(status.clone());
        inner.bump(&mut record);
        inner.records.insert(identity.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FINALIZER, ReleaseRequestSpec};

    fn request(name: &str) -> ReleaseRequest {
        ReleaseRequest::new(name, ReleaseRequestSpec::default())
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MockRecordStore::new();
        let created = store.create(request("a")).unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        assert!(store.create(request("a")).unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MockRecordStore::new();
        let created = store.create(request("a")).unwrap();
        let identity = created.identity();

        store.edit(&identity, |r| r.spec.chart_name = "edited".to_string());

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());

        let fresh = store.get(&identity).await.unwrap().unwrap();
        assert!(store.update(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MockRecordStore::new();
        let mut rr = request("a");
        rr.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        let created = store.create(rr).unwrap();
        let identity = created.identity();

        assert!(store.delete(&identity));
        let mut pending = store.get(&identity).await.unwrap().unwrap();
        assert!(pending.is_deleting());

        pending.metadata.finalizers = Some(Vec::new());
        store.update(&pending).await.unwrap();
        assert!(store.record(&identity).is_none());
        assert!(!store.delete(&identity));
    }

    #[tokio::test]
    async fn test_status_is_kept_across_updates() {
        let store = MockRecordStore::new();
        let created = store.create(request("a")).unwrap();
        let identity = created.identity();

        store
            .update_status(&identity, &ReleaseStatus::success("a", "installed"))
            .await
            .unwrap();
        let fresh = store.get(&identity).await.unwrap().unwrap();
        let mut without_status = fresh.clone();
        without_status.status = None;
        store.update(&without_status).await.unwrap();

        assert_eq!(store.status(&identity).unwrap().reason, "installed");
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_one_shot() {
        let store = MockRecordStore::new();
        let created = store.create(request("a")).unwrap();
        let identity = created.identity();

        store.conflict_next_status_update();
        let status = ReleaseStatus::success("a", "ok");
        assert!(store.update_status(&identity, &status).await.unwrap_err().is_conflict());
        assert!(store.update_status(&identity, &status).await.is_ok());

        let counts = store.operation_counts();
        assert_eq!(counts.status_updates, 2);
        store.reset_counts();
        assert_eq!(store.operation_counts(), StoreOperationCounts::default());
    }
}
