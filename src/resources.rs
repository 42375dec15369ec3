//! Desired-state specifications submitted to the resource store.
//!
//! Each spec knows its identity, validates its own invariants, and renders
//! the `broker.amq.io/v1beta1` manifest the operator reconciles.

use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;

pub const API_GROUP: &str = "broker.amq.io";
pub const API_VERSION: &str = "v1beta1";

/// Port the broker's core acceptor listens on inside each pod.
pub const BROKER_PORT: u16 = 61616;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cluster,
    Address,
    Security,
}

impl ResourceKind {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "ActiveMQArtemis",
            ResourceKind::Address => "ActiveMQArtemisAddress",
            ResourceKind::Security => "ActiveMQArtemisSecurity",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "activemqartemises",
            ResourceKind::Address => "activemqartemisaddresses",
            ResourceKind::Security => "activemqartemissecurities",
        }
    }

    pub fn api_version() -> String {
        format!("{API_GROUP}/{API_VERSION}")
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of a submitted resource: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("{0}: name must not be empty")]
    EmptyName(ResourceKind),
    #[error("security domain references unknown login module '{module}'")]
    UnknownLoginModule { module: String },
    #[error("duplicate {kind} name '{name}' in plan")]
    DuplicateName { kind: ResourceKind, name: String },
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessProbe {
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub readiness: Option<ReadinessProbe>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, replicas: u32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            replicas,
            readiness: None,
        }
    }

    pub fn with_readiness(mut self, initial_delay_seconds: u32, period_seconds: u32) -> Self {
        self.readiness = Some(ReadinessProbe {
            initial_delay_seconds,
            period_seconds,
        });
        self
    }

    /// Name of the stateful set the operator creates for this cluster.
    pub fn stateful_set_name(&self) -> String {
        format!("{}-ss", self.name)
    }

    /// Pod name of the worker with the given ordinal.
    pub fn worker_name(&self, ordinal: u32) -> String {
        format!("{}-{}", self.stateful_set_name(), ordinal)
    }

    /// Broker container inside every worker pod.
    pub fn container_name(&self) -> String {
        format!("{}-container", self.name)
    }

    /// Worker ordinals in verification order: highest first.
    pub fn ordinals_descending(&self) -> impl Iterator<Item = u32> {
        (0..self.replicas).rev()
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::Cluster,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn manifest(&self) -> serde_json::Value {
        let mut plan = json!({ "size": self.replicas });
        if let Some(probe) = &self.readiness {
            plan["readinessProbe"] = json!(probe);
        }
        manifest(&self.resource_ref(), json!({ "deploymentPlan": plan }))
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingType {
    Anycast,
    Multicast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpec {
    pub name: String,
    pub namespace: String,
    pub address_name: String,
    pub queue_name: String,
    pub routing: RoutingType,
    pub auto_delete: bool,
}

impl AddressSpec {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        address_name: impl Into<String>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            address_name: address_name.into(),
            queue_name: queue_name.into(),
            routing: RoutingType::Anycast,
            auto_delete: false,
        }
    }

    pub fn multicast(mut self, multicast: bool) -> Self {
        self.routing = if multicast {
            RoutingType::Multicast
        } else {
            RoutingType::Anycast
        };
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::Address,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    pub fn manifest(&self) -> serde_json::Value {
        manifest(
            &self.resource_ref(),
            json!({
                "addressName": self.address_name,
                "queueName": self.queue_name,
                "routingType": self.routing,
                "queueConfiguration": { "autoDelete": self.auto_delete },
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
    pub password: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertiesLoginModule {
    pub name: String,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginModuleReference {
    pub name: String,
    /// JAAS control flag, e.g. `sufficient` or `required`.
    pub flag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerDomain {
    pub name: String,
    pub login_modules: Vec<LoginModuleReference>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySpec {
    pub name: String,
    pub namespace: String,
    pub login_modules: Vec<PropertiesLoginModule>,
    pub broker_domain: BrokerDomain,
}

impl SecuritySpec {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            kind: ResourceKind::Security,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// The domain may only name login modules declared in this spec.
    pub fn validate(&self) -> Result<(), SpecError> {
        let declared: HashSet<&str> = self.login_modules.iter().map(|m| m.name.as_str()).collect();
        match self
            .broker_domain
            .login_modules
            .iter()
            .find(|r| !declared.contains(r.name.as_str()))
        {
            Some(missing) => Err(SpecError::UnknownLoginModule {
                module: missing.name.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn manifest(&self) -> serde_json::Value {
        manifest(
            &self.resource_ref(),
            json!({
                "loginModules": { "propertiesLoginModules": self.login_modules },
                "securityDomains": { "brokerDomain": self.broker_domain },
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// DesiredResource
// ---------------------------------------------------------------------------

/// Any spec the scenario can submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredResource {
    Cluster(ClusterSpec),
    Address(AddressSpec),
    Security(SecuritySpec),
}

impl DesiredResource {
    pub fn resource_ref(&self) -> ResourceRef {
        match self {
            DesiredResource::Cluster(c) => c.resource_ref(),
            DesiredResource::Address(a) => a.resource_ref(),
            DesiredResource::Security(s) => s.resource_ref(),
        }
    }

    pub fn manifest(&self) -> serde_json::Value {
        match self {
            DesiredResource::Cluster(c) => c.manifest(),
            DesiredResource::Address(a) => a.manifest(),
            DesiredResource::Security(s) => s.manifest(),
        }
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        let r = self.resource_ref();
        if r.name.is_empty() {
            return Err(SpecError::EmptyName(r.kind));
        }
        match self {
            DesiredResource::Security(s) => s.validate(),
            _ => Ok(()),
        }
    }
}

fn manifest(r: &ResourceRef, spec: serde_json::Value) -> serde_json::Value {
    json!({
        "apiVersion": ResourceKind::api_version(),
        "kind": r.kind.kind(),
        "metadata": { "name": r.name, "namespace": r.namespace },
        "spec": spec,
    })
}
