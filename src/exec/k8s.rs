//! Pod exec over the Kubernetes API (websocket upgrade via kube-rs).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};

use super::{
    BoxedReader, BoxedWriter, Completion, ExecEndpoint, ExecError, ExecRequest, ExecSession,
};

#[derive(Clone)]
pub struct KubeExecEndpoint {
    client: kube::Client,
}

impl KubeExecEndpoint {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExecEndpoint for KubeExecEndpoint {
    async fn open(&self, request: &ExecRequest) -> Result<ExecSession, ExecError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let params = AttachParams::default()
            .container(request.container.clone())
            .stdin(request.stdin)
            .stdout(request.stdout)
            .stderr(request.stderr)
            .tty(false);

        let mut attached = pods
            .exec(&request.worker, request.argv.clone(), &params)
            .await
            .map_err(|e| ExecError::Setup {
                worker: request.worker.clone(),
                reason: e.to_string(),
            })?;

        let stdin = attached.stdin().map(|w| Box::new(w) as BoxedWriter);
        let stdout = attached.stdout().map(|r| Box::new(r) as BoxedReader);
        let stderr = attached.stderr().map(|r| Box::new(r) as BoxedReader);
        let status = attached.take_status();

        let completion: Completion = Box::pin(async move {
            let status = match status {
                Some(status) => status.await,
                None => None,
            };
            attached
                .join()
                .await
                .map_err(|e| ExecError::Aborted(e.to_string()))?;
            check_status(status)
        });

        Ok(ExecSession {
            stdin,
            stdout,
            stderr,
            completion,
        })
    }
}

/// Map the API server's final exec status onto success or an execution error.
fn check_status(status: Option<Status>) -> Result<(), ExecError> {
    let Some(status) = status else {
        return Err(ExecError::Aborted(
            "stream closed without a completion status".into(),
        ));
    };
    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    let message = status.message.clone().unwrap_or_default();
    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|c| c.reason.as_deref() == Some("ExitCode"))
                    .and_then(|c| c.message.as_deref())
                    .and_then(|m| m.parse::<i32>().ok())
            });
        return Err(ExecError::NonZeroExit { code, message });
    }
    Err(ExecError::Aborted(message))
}
