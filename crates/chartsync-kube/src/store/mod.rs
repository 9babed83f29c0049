//! Record store boundary
//!
//! The reconciler reads and writes release requests through [`RecordStore`]:
//! - **Kubernetes** ([`KubeRecordStore`]): the API server, with resourceVersion
//!   checks on metadata writes and merge patches on the status subresource
//! - **Mock** ([`MockRecordStore`]): in-memory store for tests

mod cluster;
mod mock;

pub use cluster::KubeRecordStore;
pub use mock::{MockRecordStore, StoreOperationCounts};

use async_trait::async_trait;
use chartsync_core::{ReleaseStatus, RequestIdentity};
use serde_json::{Value, json};

use crate::crd::ReleaseRequest;
use crate::error::Result;

/// Store of release requests
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a request; `Ok(None)` when it does not exist
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<ReleaseRequest>>;

    /// Write metadata and spec. Fails with a conflict when the stored
    /// resourceVersion differs from the one on `record`.
    async fn update(&self, record: &ReleaseRequest) -> Result<ReleaseRequest>;

    /// Overwrite the status (last write wins)
    async fn update_status(&self, identity: &RequestIdentity, status: &ReleaseStatus) -> Result<()>;
}

/// Merge patch replacing the whole status
///
/// Optional fields are sent as explicit nulls so values from a previous
/// status do not survive the merge.
pub fn status_patch(status: &ReleaseStatus) -> Result<Value> {
    let mut value = serde_json::to_value(status)?;
    if let Value::Object(map) = &mut value {
        for key in ["failureKind", "releaseName", "lastTransitionTime"] {
            map.entry(key).or_insert(Value::Null);
        }
    }
    Ok(json!({ "status": value }))
}
