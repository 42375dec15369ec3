use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::retry::{RetryError, RetryWindow};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub scenario: ScenarioSettings,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Gates the expensive phases of a run. Both switches must be on for the
/// convergence and in-pod verification phases to execute.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioSettings {
    #[serde(default)]
    pub run_against_live_cluster: bool,
    #[serde(default)]
    pub deploy_controller: bool,
    /// Wait for the full ready count after the cluster is created and before
    /// dependent resources are submitted.
    #[serde(default = "default_true")]
    pub wait_before_dependents: bool,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            run_against_live_cluster: false,
            deploy_controller: false,
            wait_before_dependents: true,
        }
    }
}

impl ScenarioSettings {
    pub const LIVE_CLUSTER_ENV: &'static str = "USE_EXISTING_CLUSTER";
    pub const DEPLOY_CONTROLLER_ENV: &'static str = "DEPLOY_OPERATOR";

    /// Fully live configuration, used by tests that drive an in-memory store
    /// through every phase.
    pub fn live() -> Self {
        Self {
            run_against_live_cluster: true,
            deploy_controller: true,
            wait_before_dependents: true,
        }
    }

    /// Layer the two process switches over the configured values. Only
    /// `"true"` enables a switch; unset variables keep the configured value.
    ///
    /// Called once at startup; everything downstream takes the result.
    pub fn with_process_env(self) -> Self {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply switch values from a lookup function. A switch that the lookup
    /// does not know about keeps its current value.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(Self::LIVE_CLUSTER_ENV) {
            self.run_against_live_cluster = v == "true";
        }
        if let Some(v) = lookup(Self::DEPLOY_CONTROLLER_ENV) {
            self.deploy_controller = v == "true";
        }
        self
    }

    pub fn verifies_live_state(&self) -> bool {
        self.run_against_live_cluster && self.deploy_controller
    }
}

/// Poll windows for each wait in a run, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_cluster_timeout_ms")]
    pub convergence_timeout_ms: u64,
    #[serde(default = "default_cluster_interval_ms")]
    pub convergence_interval_ms: u64,
    #[serde(default = "default_cluster_timeout_ms")]
    pub worker_timeout_ms: u64,
    #[serde(default = "default_cluster_interval_ms")]
    pub worker_interval_ms: u64,
    #[serde(default = "default_persist_timeout_ms")]
    pub persistence_timeout_ms: u64,
    #[serde(default = "default_persist_interval_ms")]
    pub persistence_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            convergence_timeout_ms: default_cluster_timeout_ms(),
            convergence_interval_ms: default_cluster_interval_ms(),
            worker_timeout_ms: default_cluster_timeout_ms(),
            worker_interval_ms: default_cluster_interval_ms(),
            persistence_timeout_ms: default_persist_timeout_ms(),
            persistence_interval_ms: default_persist_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn convergence_window(&self) -> Result<RetryWindow, RetryError> {
        window(self.convergence_timeout_ms, self.convergence_interval_ms)
    }

    pub fn worker_window(&self) -> Result<RetryWindow, RetryError> {
        window(self.worker_timeout_ms, self.worker_interval_ms)
    }

    pub fn persistence_window(&self) -> Result<RetryWindow, RetryError> {
        window(self.persistence_timeout_ms, self.persistence_interval_ms)
    }
}

fn window(timeout_ms: u64, interval_ms: u64) -> Result<RetryWindow, RetryError> {
    RetryWindow::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(interval_ms),
    )
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cluster_timeout_ms() -> u64 {
    180_000
}

fn default_cluster_interval_ms() -> u64 {
    10_000
}

fn default_persist_timeout_ms() -> u64 {
    30_000
}

fn default_persist_interval_ms() -> u64 {
    500
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scenario: ScenarioSettings::default(),
            timing: TimingConfig::default(),
            namespace: default_namespace(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
