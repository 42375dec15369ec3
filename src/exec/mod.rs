//! Running commands inside worker pods over a multiplexed stream.
//!
//! An [`ExecEndpoint`] opens the stream and hands back one reader or writer
//! per attached channel plus a completion future. [`RemoteExecClient`] drives
//! that session to the end: stdin is closed without writing, stdout and
//! stderr are drained concurrently into buffers, and the completion result
//! decides whether the run counts as a failure. Output captured before a
//! failure is kept in the [`StreamResult`].

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{Instrument, debug, info_span};

#[cfg(feature = "k8s")]
pub mod k8s;

#[cfg(feature = "k8s")]
pub use k8s::KubeExecEndpoint;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type Completion = Pin<Box<dyn Future<Output = Result<(), ExecError>> + Send>>;

/// Which half of an exec an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// The stream never opened: pod missing, endpoint unreachable, forbidden.
    Setup,
    /// The stream opened but the command failed or the stream broke.
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("could not open exec stream to {worker}: {reason}")]
    Setup { worker: String, reason: String },
    #[error("remote command exited with code {code:?}: {message}")]
    NonZeroExit { code: Option<i32>, message: String },
    #[error("exec stream aborted: {0}")]
    Aborted(String),
}

impl ExecError {
    pub fn kind(&self) -> ExecErrorKind {
        match self {
            ExecError::Setup { .. } => ExecErrorKind::Setup,
            ExecError::NonZeroExit { .. } | ExecError::Aborted(_) => ExecErrorKind::Execution,
        }
    }
}

/// A command to run in one container of one worker pod. TTY is never
/// allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub worker: String,
    pub namespace: String,
    pub container: String,
    pub argv: Vec<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl ExecRequest {
    /// Non-interactive request with stdout and stderr attached.
    pub fn new(
        worker: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
        argv: Vec<String>,
    ) -> Self {
        Self {
            worker: worker.into(),
            namespace: namespace.into(),
            container: container.into(),
            argv,
            stdin: false,
            stdout: true,
            stderr: true,
        }
    }

    pub fn attach_stdin(mut self, stdin: bool) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn attach_stderr(mut self, stderr: bool) -> Self {
        self.stderr = stderr;
        self
    }
}

/// An upgraded stream to a running remote process.
pub struct ExecSession {
    pub stdin: Option<BoxedWriter>,
    pub stdout: Option<BoxedReader>,
    pub stderr: Option<BoxedReader>,
    /// Resolves once the remote process has exited and the stream closed.
    pub completion: Completion,
}

/// Opens exec sessions against worker pods.
#[async_trait]
pub trait ExecEndpoint: Send + Sync {
    async fn open(&self, request: &ExecRequest) -> Result<ExecSession, ExecError>;
}

#[async_trait]
impl<E: ExecEndpoint + ?Sized> ExecEndpoint for std::sync::Arc<E> {
    async fn open(&self, request: &ExecRequest) -> Result<ExecSession, ExecError> {
        (**self).open(request).await
    }
}

/// Endpoint for runs with no cluster behind them. Every open fails at setup.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineEndpoint;

#[async_trait]
impl ExecEndpoint for OfflineEndpoint {
    async fn open(&self, request: &ExecRequest) -> Result<ExecSession, ExecError> {
        Err(ExecError::Setup {
            worker: request.worker.clone(),
            reason: "no exec endpoint configured for offline runs".into(),
        })
    }
}

/// Output of one exec invocation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StreamResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub error: Option<ExecError>,
}

impl StreamResult {
    fn failed(error: ExecError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

impl fmt::Debug for StreamResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResult")
            .field("stdout", &self.stdout_lossy())
            .field("stderr", &self.stderr_lossy())
            .field("error", &self.error)
            .finish()
    }
}

/// Read a channel to EOF. Bytes read before an error are kept.
async fn drain(reader: Option<BoxedReader>) -> (Vec<u8>, Option<io::Error>) {
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return (buf, None);
    };
    match reader.read_to_end(&mut buf).await {
        Ok(_) => (buf, None),
        Err(e) => (buf, Some(e)),
    }
}

pub struct RemoteExecClient<E> {
    endpoint: E,
}

impl<E: ExecEndpoint> RemoteExecClient<E> {
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Run `request` to completion and capture its output.
    ///
    /// Never returns early on the happy path: everything the remote process
    /// wrote before closing its streams is in the result.
    pub async fn exec(&self, request: &ExecRequest) -> StreamResult {
        let span = info_span!(
            "exec",
            worker = %request.worker,
            namespace = %request.namespace,
            container = %request.container,
        );
        self.exec_inner(request).instrument(span).await
    }

    async fn exec_inner(&self, request: &ExecRequest) -> StreamResult {
        let session = match self.endpoint.open(request).await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, "exec stream setup failed");
                return StreamResult::failed(e);
            }
        };
        let ExecSession {
            stdin,
            stdout,
            stderr,
            completion,
        } = session;

        // Commands are non-interactive: close stdin so the remote side sees EOF.
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.shutdown().await {
                debug!(error = %e, "closing remote stdin failed");
            }
        }

        let ((stdout, out_err), (stderr, err_err), done) =
            tokio::join!(drain(stdout), drain(stderr), completion);

        let error = match (done, out_err, err_err) {
            (Err(e), _, _) => Some(e),
            (Ok(()), Some(e), _) => Some(ExecError::Aborted(format!("stdout: {e}"))),
            (Ok(()), None, Some(e)) => Some(ExecError::Aborted(format!("stderr: {e}"))),
            (Ok(()), None, None) => None,
        };
        debug!(
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            error = ?error,
            "exec finished"
        );
        StreamResult {
            stdout,
            stderr,
            error,
        }
    }
}
