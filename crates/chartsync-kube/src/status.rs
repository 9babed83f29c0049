//! Status recorder

use chartsync_core::{ReleaseStatus, RequestIdentity};
use chrono::Utc;
use std::sync::Arc;

use crate::error::Result;
use crate::store::RecordStore;

/// Writes the outcome of an attempt back to the release request
///
/// Writes are last-write-wins. Attempts for one identity are serialized
/// upstream, so no merging happens here.
#[derive(Clone)]
pub struct StatusRecorder {
    store: Arc<dyn RecordStore>,
}

impl StatusRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Stamp `status` against the previously stored one and write it
    ///
    /// Nothing is written when the result equals `previous`, so steady-state
    /// passes do not touch the request.
    pub async fn record(
        &self,
        identity: &RequestIdentity,
        previous: Option<&ReleaseStatus>,
        status: ReleaseStatus,
    ) -> Result<ReleaseStatus> {
        let status = status.stamped(previous, Utc::now());
        if previous == Some(&status) {
            tracing::trace!(request = %identity, "status unchanged");
            return Ok(status);
        }
        self.store.update_status(identity, &status).await?;
        tracing::debug!(request = %identity, state = %status.state, reason = %status.reason, "status recorded");
        Ok(status)
    }
}
