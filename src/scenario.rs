//! End-to-end verification run: submit, converge, check every worker, clean up.
//!
//! A run moves through
//! `Built -> Submitted -> Converged -> PerUnitVerifying -> Verified -> CleanedUp`.
//! Any fatal error moves it to `Failed` instead, but resources the run already
//! created are deleted either way. When the settings do not enable live
//! verification the run stops after submission and goes straight to cleanup.

use std::collections::HashSet;
use std::fmt;
use tracing::{error, info, warn};

use crate::exec::{ExecEndpoint, ExecRequest, RemoteExecClient};
use crate::resources::{
    AddressSpec, BrokerDomain, ClusterSpec, DesiredResource, LoginModuleReference,
    PropertiesLoginModule, ResourceRef, SecuritySpec, SpecError, User,
};
use crate::retry::{Exhausted, RetryError, RetryWindow, poll};
use crate::settings::{ScenarioSettings, TimingConfig};
use crate::state::{NotConverged, PersistedProbe, ReadyWorkersProbe};
use crate::store::{ResourceStore, StoreError};
use crate::verify::{QueueStatCommand, WorkerCheckError, WorkerProbe};

/// Phase of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Built,
    Submitted,
    Converged,
    PerUnitVerifying,
    Verified,
    CleanedUp,
    Failed,
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioPhase::Built => write!(f, "Built"),
            ScenarioPhase::Submitted => write!(f, "Submitted"),
            ScenarioPhase::Converged => write!(f, "Converged"),
            ScenarioPhase::PerUnitVerifying => write!(f, "PerUnitVerifying"),
            ScenarioPhase::Verified => write!(f, "Verified"),
            ScenarioPhase::CleanedUp => write!(f, "CleanedUp"),
            ScenarioPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] SpecError),
    #[error("submitting {resource} failed: {source}")]
    Submission {
        resource: ResourceRef,
        source: StoreError,
    },
    #[error("{resource} was never persisted: {source}")]
    NotPersisted {
        resource: ResourceRef,
        source: Exhausted<NotConverged>,
    },
    #[error("cluster did not reach {expected} ready workers (last observed {last_observed:?}): {source}")]
    ConvergenceTimeout {
        expected: u32,
        last_observed: Option<u32>,
        source: Exhausted<NotConverged>,
    },
    #[error("worker {worker} failed verification: {source}")]
    WorkerVerification {
        worker: String,
        source: Exhausted<WorkerCheckError>,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("deleting {resource} failed: {source}")]
pub struct CleanupError {
    pub resource: ResourceRef,
    pub source: StoreError,
}

/// Everything a run submits and what it expects to see inside each worker.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub cluster: ClusterSpec,
    pub security: Option<SecuritySpec>,
    pub addresses: Vec<AddressSpec>,
    pub command: QueueStatCommand,
}

impl ScenarioPlan {
    /// Five-broker cluster with a properties-file security domain and five
    /// multicast addresses `myAddress0..4` / `myQueue0..4`.
    pub fn address_rollout(namespace: &str) -> Self {
        let cluster = ClusterSpec::new("ex-aao-broker", namespace, 5).with_readiness(1, 5);

        let module_name = "prop-module".to_string();
        let security = SecuritySpec {
            name: "ex-proper".into(),
            namespace: namespace.into(),
            login_modules: vec![PropertiesLoginModule {
                name: module_name.clone(),
                users: vec![User {
                    name: "morty".into(),
                    password: Some("geezrick".into()),
                    roles: vec!["admin".into(), "random".into()],
                }],
            }],
            broker_domain: BrokerDomain {
                name: "activemq".into(),
                login_modules: vec![LoginModuleReference {
                    name: module_name,
                    flag: "sufficient".into(),
                }],
            },
        };

        let addresses = (0..5)
            .map(|i| {
                AddressSpec::new(
                    format!("ex-aaoaddress{i}"),
                    namespace,
                    format!("myAddress{i}"),
                    format!("myQueue{i}"),
                )
                .multicast(true)
                .auto_delete(true)
            })
            .collect();

        Self {
            cluster,
            security: Some(security),
            addresses,
            command: QueueStatCommand::new("morty", "geezrick"),
        }
    }

    /// Substrings every worker's output must contain: one per queue.
    pub fn markers(&self) -> Vec<String> {
        self.addresses.iter().map(|a| a.queue_name.clone()).collect()
    }

    /// Resources in submission order.
    pub fn resources(&self) -> Vec<DesiredResource> {
        let mut out = vec![DesiredResource::Cluster(self.cluster.clone())];
        out.extend(self.security.iter().cloned().map(DesiredResource::Security));
        out.extend(self.addresses.iter().cloned().map(DesiredResource::Address));
        out
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        let mut seen = HashSet::new();
        for resource in self.resources() {
            resource.validate()?;
            let r = resource.resource_ref();
            if !seen.insert(r.clone()) {
                return Err(SpecError::DuplicateName {
                    kind: r.kind,
                    name: r.name,
                });
            }
        }
        Ok(())
    }

    pub fn worker_request(&self, ordinal: u32) -> ExecRequest {
        let worker = self.cluster.worker_name(ordinal);
        let argv = self.command.argv(&worker);
        ExecRequest::new(
            worker,
            &self.cluster.namespace,
            self.cluster.container_name(),
            argv,
        )
    }
}

/// Poll windows for the three waits in a run.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioTiming {
    pub convergence: RetryWindow,
    pub worker: RetryWindow,
    pub persistence: RetryWindow,
}

impl ScenarioTiming {
    pub fn from_config(cfg: &TimingConfig) -> Result<Self, RetryError> {
        Ok(Self {
            convergence: cfg.convergence_window()?,
            worker: cfg.worker_window()?,
            persistence: cfg.persistence_window()?,
        })
    }
}

/// Store and exec handles shared by every step of a run. Built once at
/// startup and passed by reference.
pub struct ScenarioContext<S, E> {
    pub store: S,
    pub exec: RemoteExecClient<E>,
}

impl<S: ResourceStore, E: ExecEndpoint> ScenarioContext<S, E> {
    pub fn new(store: S, endpoint: E) -> Self {
        Self {
            store,
            exec: RemoteExecClient::new(endpoint),
        }
    }
}

#[cfg(feature = "k8s")]
impl ScenarioContext<crate::store::KubeStore, crate::exec::KubeExecEndpoint> {
    /// One kube client, shared by the store and the exec endpoint.
    pub async fn connect() -> Result<Self, StoreError> {
        let store = crate::store::KubeStore::try_default().await?;
        let endpoint = crate::exec::KubeExecEndpoint::new(store.client().clone());
        Ok(Self::new(store, endpoint))
    }
}

/// What happened during a run.
#[derive(Debug)]
pub struct ScenarioReport {
    /// Phases entered, in order.
    pub trail: Vec<ScenarioPhase>,
    /// Resources this run created, in creation order.
    pub created: Vec<ResourceRef>,
    /// Workers confirmed, in the order they were checked.
    pub verified_workers: Vec<String>,
    /// Resources successfully deleted during cleanup.
    pub deleted: Vec<ResourceRef>,
    pub cleanup_errors: Vec<CleanupError>,
    pub failure: Option<ScenarioError>,
}

impl ScenarioReport {
    fn new() -> Self {
        Self {
            trail: vec![ScenarioPhase::Built],
            created: Vec::new(),
            verified_workers: Vec::new(),
            deleted: Vec::new(),
            cleanup_errors: Vec::new(),
            failure: None,
        }
    }

    fn enter(&mut self, phase: ScenarioPhase) {
        info!(%phase, "scenario phase");
        self.trail.push(phase);
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn final_phase(&self) -> ScenarioPhase {
        self.trail.last().copied().unwrap_or(ScenarioPhase::Built)
    }

    pub fn reached(&self, phase: ScenarioPhase) -> bool {
        self.trail.contains(&phase)
    }
}

pub struct VerificationScenario<'a, S, E> {
    ctx: &'a ScenarioContext<S, E>,
    plan: ScenarioPlan,
    settings: ScenarioSettings,
    timing: ScenarioTiming,
}

impl<'a, S: ResourceStore, E: ExecEndpoint> VerificationScenario<'a, S, E> {
    pub fn new(
        ctx: &'a ScenarioContext<S, E>,
        plan: ScenarioPlan,
        settings: ScenarioSettings,
        timing: ScenarioTiming,
    ) -> Self {
        Self {
            ctx,
            plan,
            settings,
            timing,
        }
    }

    /// Execute the run. Never returns early: the report carries the outcome,
    /// and cleanup has been attempted by the time it comes back.
    #[tracing::instrument(level = "info", skip(self), fields(cluster = %self.plan.cluster.name))]
    pub async fn run(&self) -> ScenarioReport {
        let mut report = ScenarioReport::new();
        if let Err(e) = self.drive(&mut report).await {
            error!(error = %e, "scenario failed");
            report.enter(ScenarioPhase::Failed);
            report.failure = Some(e);
        }
        self.cleanup(&mut report).await;
        if report.passed() {
            report.enter(ScenarioPhase::CleanedUp);
        }
        report
    }

    async fn drive(&self, report: &mut ScenarioReport) -> Result<(), ScenarioError> {
        self.plan.validate()?;
        let live = self.settings.verifies_live_state();

        self.submit(DesiredResource::Cluster(self.plan.cluster.clone()), report)
            .await?;
        if live && self.settings.wait_before_dependents {
            info!("waiting for all workers to be started and ready");
            self.await_ready().await?;
        }
        if let Some(security) = &self.plan.security {
            self.submit(DesiredResource::Security(security.clone()), report)
                .await?;
        }
        for address in &self.plan.addresses {
            self.submit(DesiredResource::Address(address.clone()), report)
                .await?;
            self.await_persisted(address.resource_ref()).await?;
        }
        report.enter(ScenarioPhase::Submitted);

        if !live {
            info!("live verification disabled, skipping convergence and worker checks");
            return Ok(());
        }

        info!("waiting for all workers to be restarted and ready");
        self.await_ready().await?;
        report.enter(ScenarioPhase::Converged);

        report.enter(ScenarioPhase::PerUnitVerifying);
        for ordinal in self.plan.cluster.ordinals_descending() {
            let worker = self.verify_worker(ordinal).await?;
            report.verified_workers.push(worker);
        }
        report.enter(ScenarioPhase::Verified);
        Ok(())
    }

    async fn submit(
        &self,
        resource: DesiredResource,
        report: &mut ScenarioReport,
    ) -> Result<(), ScenarioError> {
        let r = resource.resource_ref();
        match self.ctx.store.create(&resource).await {
            Ok(()) => {
                info!(resource = %r, "submitted");
                report.created.push(r);
                Ok(())
            }
            Err(source) => Err(ScenarioError::Submission {
                resource: r,
                source,
            }),
        }
    }

    async fn await_ready(&self) -> Result<(), ScenarioError> {
        let expected = self.plan.cluster.replicas;
        let mut probe =
            ReadyWorkersProbe::new(&self.ctx.store, self.plan.cluster.resource_ref(), expected);
        match poll(&mut probe, self.timing.convergence).await {
            Ok(_) => Ok(()),
            Err(source) => Err(ScenarioError::ConvergenceTimeout {
                expected,
                last_observed: probe.last_observed(),
                source,
            }),
        }
    }

    async fn await_persisted(&self, resource: ResourceRef) -> Result<(), ScenarioError> {
        let mut probe = PersistedProbe::new(&self.ctx.store, resource.clone());
        poll(&mut probe, self.timing.persistence)
            .await
            .map(|_| ())
            .map_err(|source| ScenarioError::NotPersisted { resource, source })
    }

    async fn verify_worker(&self, ordinal: u32) -> Result<String, ScenarioError> {
        let request = self.plan.worker_request(ordinal);
        let worker = request.worker.clone();
        let mut probe = WorkerProbe::new(&self.ctx.exec, request, self.plan.markers());
        match poll(&mut probe, self.timing.worker).await {
            Ok(_) => {
                info!(%worker, attempts = probe.attempts(), "worker verified");
                Ok(worker)
            }
            Err(source) => Err(ScenarioError::WorkerVerification { worker, source }),
        }
    }

    /// Delete what this run created, newest first.
    async fn cleanup(&self, report: &mut ScenarioReport) {
        for resource in report.created.clone().into_iter().rev() {
            match self.ctx.store.delete(&resource).await {
                Ok(()) => report.deleted.push(resource),
                Err(source) => {
                    warn!(%resource, error = %source, "cleanup failed");
                    report.cleanup_errors.push(CleanupError { resource, source });
                }
            }
        }
    }
}
