//! In-pod confirmation that every broker worker sees the deployed queues.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::exec::{
    ExecEndpoint, ExecError, ExecErrorKind, ExecRequest, RemoteExecClient, StreamResult,
};
use crate::resources::BROKER_PORT;
use crate::retry::Probe;

/// `artemis queue stat` invocation run inside each worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatCommand {
    pub cli_path: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl QueueStatCommand {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            cli_path: "amq-broker/bin/artemis".to_string(),
            user: user.into(),
            password: password.into(),
            port: BROKER_PORT,
        }
    }

    /// Argument vector targeting the broker in `worker` by its in-cluster name.
    pub fn argv(&self, worker: &str) -> Vec<String> {
        vec![
            self.cli_path.clone(),
            "queue".into(),
            "stat".into(),
            "--user".into(),
            self.user.clone(),
            "--password".into(),
            self.password.clone(),
            "--url".into(),
            format!("tcp://{}:{}", worker, self.port),
        ]
    }
}

/// Why one worker check attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerCheckError {
    #[error("{worker}: {error}")]
    Exec {
        worker: String,
        error: ExecError,
        output: StreamResult,
    },
    #[error("{worker}: output is missing {missing:?}")]
    MissingMarkers {
        worker: String,
        missing: Vec<String>,
        output: StreamResult,
    },
}

impl WorkerCheckError {
    /// None for assertion failures, which are not exec errors.
    pub fn exec_kind(&self) -> Option<ExecErrorKind> {
        match self {
            WorkerCheckError::Exec { error, .. } => Some(error.kind()),
            WorkerCheckError::MissingMarkers { .. } => None,
        }
    }

    /// Output captured by the failed attempt.
    pub fn output(&self) -> &StreamResult {
        match self {
            WorkerCheckError::Exec { output, .. }
            | WorkerCheckError::MissingMarkers { output, .. } => output,
        }
    }
}

/// Markers from `expected` that do not occur in `output`, in order.
pub fn missing_markers(output: &str, expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|m| !output.contains(m.as_str()))
        .cloned()
        .collect()
}

/// Runs one command in one worker and passes when stdout holds every marker.
pub struct WorkerProbe<'a, E> {
    client: &'a RemoteExecClient<E>,
    request: ExecRequest,
    markers: Vec<String>,
    attempts: u32,
}

impl<'a, E: ExecEndpoint> WorkerProbe<'a, E> {
    pub fn new(
        client: &'a RemoteExecClient<E>,
        request: ExecRequest,
        markers: Vec<String>,
    ) -> Self {
        Self {
            client,
            request,
            markers,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[async_trait]
impl<'a, E: ExecEndpoint> Probe for WorkerProbe<'a, E> {
    type Output = StreamResult;
    type Error = WorkerCheckError;

    async fn attempt(&mut self) -> Result<StreamResult, WorkerCheckError> {
        self.attempts += 1;
        info!(worker = %self.request.worker, attempt = self.attempts, "checking worker");
        let output = self.client.exec(&self.request).await;
        if let Some(error) = output.error.clone() {
            return Err(WorkerCheckError::Exec {
                worker: self.request.worker.clone(),
                error,
                output,
            });
        }

        let stdout = output.stdout_lossy();
        debug!(worker = %self.request.worker, out = %stdout, "worker output");
        let missing = missing_markers(&stdout, &self.markers);
        if missing.is_empty() {
            Ok(output)
        } else {
            Err(WorkerCheckError::MissingMarkers {
                worker: self.request.worker.clone(),
                missing,
                output,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_targets_worker_url() {
        let argv = QueueStatCommand::new("morty", "geezrick").argv("ex-aao-broker-ss-3");
        assert_eq!(argv[0], "amq-broker/bin/artemis");
        assert_eq!(&argv[1..3], ["queue", "stat"]);
        assert_eq!(argv.last().unwrap(), "tcp://ex-aao-broker-ss-3:61616");
        assert!(argv.windows(2).any(|w| w == ["--user", "morty"]));
        assert!(argv.windows(2).any(|w| w == ["--password", "geezrick"]));
    }

    #[test]
    fn missing_markers_preserves_order() {
        let expected: Vec<String> = (0..3).map(|i| format!("myQueue{i}")).collect();
        assert_eq!(
            missing_markers("|myQueue1 |0|", &expected),
            vec!["myQueue0".to_string(), "myQueue2".to_string()]
        );
        assert!(missing_markers("myQueue0 myQueue1 myQueue2", &expected).is_empty());
    }
}
