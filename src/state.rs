//! Reading observed resource state and the convergence probes built on it.

use async_trait::async_trait;
use std::fmt;

use crate::resources::{ResourceKind, ResourceRef};
use crate::retry::Probe;
use crate::store::{ObservedState, ResourceStore, StoreError};

/// Outcome of a single read. Absence is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(ObservedState),
    NotFound,
}

impl Lookup {
    pub fn found(self) -> Option<ObservedState> {
        match self {
            Lookup::Found(state) => Some(state),
            Lookup::NotFound => None,
        }
    }
}

/// Typed, read-only view of the resource store.
pub struct ResourceStateReader<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ResourceStore + ?Sized> ResourceStateReader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn read(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup, StoreError> {
        Ok(match self.store.get(kind, namespace, name).await? {
            Some(state) => Lookup::Found(state),
            None => Lookup::NotFound,
        })
    }

    pub async fn read_ref(&self, resource: &ResourceRef) -> Result<Lookup, StoreError> {
        self.read(resource.kind, &resource.namespace, &resource.name)
            .await
    }
}

/// Why a convergence attempt did not pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotConverged {
    #[error("{0} not found")]
    Missing(ResourceRef),
    #[error("{resource}: {observed} of {expected} workers ready")]
    ReadyMismatch {
        resource: ResourceRef,
        expected: u32,
        observed: u32,
    },
    #[error("{resource}: persisted name '{observed}' does not match")]
    NameMismatch {
        resource: ResourceRef,
        observed: String,
    },
    #[error("read failed: {0}")]
    Store(#[from] StoreError),
}

impl NotConverged {
    /// Ready count seen by the attempt, if it got that far.
    pub fn observed_ready(&self) -> Option<u32> {
        match self {
            NotConverged::ReadyMismatch { observed, .. } => Some(*observed),
            _ => None,
        }
    }
}

/// Passes once a cluster reports exactly `expected` ready workers.
pub struct ReadyWorkersProbe<'a, S: ?Sized> {
    reader: ResourceStateReader<'a, S>,
    cluster: ResourceRef,
    expected: u32,
    last_observed: Option<u32>,
}

impl<'a, S: ResourceStore + ?Sized> ReadyWorkersProbe<'a, S> {
    pub fn new(store: &'a S, cluster: ResourceRef, expected: u32) -> Self {
        Self {
            reader: ResourceStateReader::new(store),
            cluster,
            expected,
            last_observed: None,
        }
    }

    /// Ready count from the most recent successful read.
    pub fn last_observed(&self) -> Option<u32> {
        self.last_observed
    }
}

#[async_trait]
impl<'a, S: ResourceStore + ?Sized> Probe for ReadyWorkersProbe<'a, S> {
    type Output = ObservedState;
    type Error = NotConverged;

    async fn attempt(&mut self) -> Result<ObservedState, NotConverged> {
        let state = self
            .reader
            .read_ref(&self.cluster)
            .await?
            .found()
            .ok_or_else(|| NotConverged::Missing(self.cluster.clone()))?;
        let observed = state.ready_count();
        self.last_observed = Some(observed);
        if observed == self.expected {
            Ok(state)
        } else {
            Err(NotConverged::ReadyMismatch {
                resource: self.cluster.clone(),
                expected: self.expected,
                observed,
            })
        }
    }
}

/// Passes once a created resource is readable under the name it was created with.
pub struct PersistedProbe<'a, S: ?Sized> {
    reader: ResourceStateReader<'a, S>,
    resource: ResourceRef,
}

impl<'a, S: ResourceStore + ?Sized> PersistedProbe<'a, S> {
    pub fn new(store: &'a S, resource: ResourceRef) -> Self {
        Self {
            reader: ResourceStateReader::new(store),
            resource,
        }
    }
}

#[async_trait]
impl<'a, S: ResourceStore + ?Sized> Probe for PersistedProbe<'a, S> {
    type Output = ObservedState;
    type Error = NotConverged;

    async fn attempt(&mut self) -> Result<ObservedState, NotConverged> {
        let state = self
            .reader
            .read_ref(&self.resource)
            .await?
            .found()
            .ok_or_else(|| NotConverged::Missing(self.resource.clone()))?;
        if state.resource.name != self.resource.name {
            return Err(NotConverged::NameMismatch {
                resource: self.resource.clone(),
                observed: state.resource.name,
            });
        }
        Ok(state)
    }
}

impl<S: ?Sized> fmt::Debug for ReadyWorkersProbe<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyWorkersProbe")
            .field("cluster", &self.cluster)
            .field("expected", &self.expected)
            .field("last_observed", &self.last_observed)
            .finish()
    }
}
