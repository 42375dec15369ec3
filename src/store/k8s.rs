//! Resource store backed by the broker operator's custom resources.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, PostParams};
use kube::discovery::ApiResource;

use super::{ObservedState, ResourceStore, StoreError};
use crate::resources::{API_GROUP, API_VERSION, DesiredResource, ResourceKind, ResourceRef};

/// Real Kubernetes store using the kube-rs client.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Create a store using the default in-cluster or kubeconfig configuration.
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &kube::Client {
        &self.client
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }
}

fn api_resource(kind: ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(API_GROUP, API_VERSION, kind.kind());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// Pull `status.podStatus.ready` (a list of pod names) out of a cluster object.
fn decode(resource: ResourceRef, obj: DynamicObject) -> Result<ObservedState, StoreError> {
    let ready_workers = match obj.data.pointer("/status/podStatus/ready") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<String>>(value.clone()).map_err(|e| {
            StoreError::Decode {
                resource: resource.clone(),
                reason: e.to_string(),
            }
        })?,
    };
    Ok(ObservedState {
        resource,
        ready_workers,
        resource_version: obj.metadata.resource_version,
    })
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn create(&self, resource: &DesiredResource) -> Result<(), StoreError> {
        let r = resource.resource_ref();
        let obj: DynamicObject =
            serde_json::from_value(resource.manifest()).map_err(|e| StoreError::Rejected {
                resource: r.clone(),
                reason: e.to_string(),
            })?;
        match self
            .api(r.kind, &r.namespace)
            .create(&PostParams::default(), &obj)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => Err(StoreError::AlreadyExists(r)),
            Err(kube::Error::Api(e)) if e.code == 400 || e.code == 422 => {
                Err(StoreError::Rejected {
                    resource: r,
                    reason: e.message,
                })
            }
            Err(e) => Err(StoreError::BackendError(e.to_string())),
        }
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedState>, StoreError> {
        let r = ResourceRef {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        match self.api(kind, namespace).get(name).await {
            Ok(obj) => decode(r, obj).map(Some),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(StoreError::BackendError(e.to_string())),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), StoreError> {
        match self
            .api(resource.kind, &resource.namespace)
            .delete(&resource.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()), // Already deleted
            Err(e) => Err(StoreError::BackendError(e.to_string())),
        }
    }
}
