//! Backends for the managed-resource store.
//!
//! The scenario only ever creates, reads and deletes whole resources, so the
//! seam is three calls. Available backends:
//!
//! - `memory`: in-process store for smoke runs and tests
//! - `k8s`: custom resources on a Kubernetes API server via kube-rs

use async_trait::async_trait;

use crate::resources::{DesiredResource, ResourceKind, ResourceRef};

#[cfg(feature = "k8s")]
pub mod k8s;
pub mod memory;

#[cfg(feature = "k8s")]
pub use k8s::KubeStore;
pub use memory::MemoryStore;

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("{0} already exists")]
    AlreadyExists(ResourceRef),
    #[error("{resource} rejected: {reason}")]
    Rejected {
        resource: ResourceRef,
        reason: String,
    },
    #[error("could not decode {resource}: {reason}")]
    Decode {
        resource: ResourceRef,
        reason: String,
    },
    #[error("backend error: {0}")]
    BackendError(String),
}

/// Status fields of a resource as last read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub resource: ResourceRef,
    /// Names of workers the controller reports ready. Empty for kinds that
    /// have no workers.
    pub ready_workers: Vec<String>,
    pub resource_version: Option<String>,
}

impl ObservedState {
    pub fn ready_count(&self) -> u32 {
        u32::try_from(self.ready_workers.len()).unwrap_or(u32::MAX)
    }
}

/// Create/read/delete access to desired-state resources.
///
/// `get` must be free of side effects: it is called repeatedly from poll loops.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource. Fails with `AlreadyExists` on a name collision.
    async fn create(&self, resource: &DesiredResource) -> Result<(), StoreError>;

    /// Read a resource. Returns None if it doesn't exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedState>, StoreError>;

    /// Delete a resource by identity.
    /// Not finding the resource is not an error (idempotent).
    async fn delete(&self, resource: &ResourceRef) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for std::sync::Arc<S> {
    async fn create(&self, resource: &DesiredResource) -> Result<(), StoreError> {
        (**self).create(resource).await
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedState>, StoreError> {
        (**self).get(kind, namespace, name).await
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), StoreError> {
        (**self).delete(resource).await
    }
}
