//! In-process resource store.
//!
//! Stands in for the API server when a run is not pointed at a live cluster,
//! and gives tests control over what the "controller" reports:
//!
//! - ready-worker counts can be set directly or scripted to progress one
//!   step per read, simulating a rollout
//! - creates and deletes can be made to fail for named resources
//! - mutation and read counters expose whether probes stayed read-only

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::trace;

use super::{ObservedState, ResourceStore, StoreError};
use crate::resources::{DesiredResource, ResourceKind, ResourceRef};

/// A resource held by the store with its server-side metadata
#[derive(Debug, Clone)]
struct StoredResource {
    resource: DesiredResource,
    ready: u32,
    resource_version: String,
}

impl StoredResource {
    fn observe(&self) -> ObservedState {
        let ready_workers = match &self.resource {
            DesiredResource::Cluster(c) => (0..self.ready).map(|i| c.worker_name(i)).collect(),
            _ => Vec::new(),
        };
        ObservedState {
            resource: self.resource.resource_ref(),
            ready_workers,
            resource_version: Some(self.resource_version.clone()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    resources: Mutex<HashMap<ResourceRef, StoredResource>>,
    /// Scripted ready counts per cluster, consumed one per read. The last
    /// value sticks once the script runs out.
    rollouts: Mutex<HashMap<ResourceRef, VecDeque<u32>>>,
    rejected_creates: Mutex<HashMap<ResourceRef, String>>,
    failing_deletes: Mutex<HashSet<ResourceRef>>,
    /// Monotonically increasing resource version counter
    resource_version: AtomicU64,
    mutations: AtomicU64,
    reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Report `ready` workers for a cluster from now on.
    pub async fn set_ready(&self, cluster: &ResourceRef, ready: u32) {
        self.rollouts.lock().await.remove(cluster);
        if let Some(stored) = self.resources.lock().await.get_mut(cluster) {
            stored.ready = ready;
        }
    }

    /// Each subsequent read of `cluster` reports the next count in `steps`.
    pub async fn script_rollout(&self, cluster: &ResourceRef, steps: Vec<u32>) {
        self.rollouts
            .lock()
            .await
            .insert(cluster.clone(), steps.into_iter().collect());
    }

    /// Make the next create of `resource` fail with a rejection.
    pub async fn reject_create(&self, resource: &ResourceRef, reason: impl Into<String>) {
        self.rejected_creates
            .lock()
            .await
            .insert(resource.clone(), reason.into());
    }

    /// Make every delete of `resource` fail.
    pub async fn fail_deletes_for(&self, resource: &ResourceRef) {
        self.failing_deletes.lock().await.insert(resource.clone());
    }

    pub async fn contains(&self, resource: &ResourceRef) -> bool {
        self.resources.lock().await.contains_key(resource)
    }

    pub async fn len(&self) -> usize {
        self.resources.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Successful creates plus successful deletes.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, resource: &DesiredResource) -> Result<(), StoreError> {
        let r = resource.resource_ref();
        if let Some(reason) = self.rejected_creates.lock().await.remove(&r) {
            return Err(StoreError::Rejected {
                resource: r,
                reason,
            });
        }

        let mut resources = self.resources.lock().await;
        if resources.contains_key(&r) {
            return Err(StoreError::AlreadyExists(r));
        }
        let resource_version = self.next_resource_version();
        trace!(resource = %r, %resource_version, "created");
        resources.insert(
            r,
            StoredResource {
                resource: resource.clone(),
                ready: 0,
                resource_version,
            },
        );
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObservedState>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let r = ResourceRef {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let mut resources = self.resources.lock().await;
        let Some(stored) = resources.get_mut(&r) else {
            return Ok(None);
        };

        let mut rollouts = self.rollouts.lock().await;
        if let Some(steps) = rollouts.get_mut(&r) {
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().copied()
            };
            if let Some(ready) = step {
                stored.ready = ready;
            }
        }
        Ok(Some(stored.observe()))
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<(), StoreError> {
        if self.failing_deletes.lock().await.contains(resource) {
            return Err(StoreError::BackendError(format!(
                "simulated delete failure for {resource}"
            )));
        }
        if self.resources.lock().await.remove(resource).is_some() {
            trace!(%resource, "deleted");
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        self.rollouts.lock().await.remove(resource);
        Ok(())
    }
}
