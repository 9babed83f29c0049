//! Kubernetes-backed record store

use async_trait::async_trait;
use chartsync_core::{ReleaseStatus, RequestIdentity};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};

use super::{RecordStore, status_patch};
use crate::crd::{FIELD_MANAGER, ReleaseRequest};
use crate::error::{KubeError, Result};

/// Release requests stored in the API server
#[derive(Clone)]
pub struct KubeRecordStore {
    client: Client,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ReleaseRequest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get(&self, identity: &RequestIdentity) -> Result<Option<ReleaseRequest>> {
        Ok(self.api(&identity.namespace).get_opt(&identity.name).await?)
    }

    async fn update(&self, record: &ReleaseRequest) -> Result<ReleaseRequest> {
        let identity = record.identity();
        let params = PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        };

        // replace carries metadata.resourceVersion, so a stale copy gets a 409
        match self
            .api(&identity.namespace)
            .replace(&record.name_any(), &params, record)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(KubeError::Conflict {
                identity: identity.to_string(),
            }),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(KubeError::RecordNotFound {
                identity: identity.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status(
        &self,
        identity: &RequestIdentity,
        status: &ReleaseStatus,
    ) -> Result<()> {
        let patch = status_patch(status)?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match self
            .api(&identity.namespace)
            .patch_status(&identity.name, &params, &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(KubeError::RecordNotFound {
                identity: identity.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
