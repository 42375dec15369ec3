#![allow(dead_code)]

use artemis_verify::exec::{
    BoxedReader, BoxedWriter, Completion, ExecEndpoint, ExecError, ExecRequest, ExecSession,
};
use artemis_verify::retry::RetryWindow;
use artemis_verify::scenario::ScenarioTiming;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

pub fn window(timeout_secs: u64, interval_secs: u64) -> RetryWindow {
    RetryWindow::new(
        Duration::from_secs(timeout_secs),
        Duration::from_secs(interval_secs),
    )
    .unwrap()
}

/// The production windows: 180s/10s for convergence and workers.
pub fn cluster_timing() -> ScenarioTiming {
    ScenarioTiming {
        convergence: window(180, 10),
        worker: window(180, 10),
        persistence: RetryWindow::new(Duration::from_secs(30), Duration::from_millis(500)).unwrap(),
    }
}

/// Canned behaviour for one exec invocation.
#[derive(Debug, Clone)]
pub struct Script {
    pub stdout_chunks: Vec<Vec<u8>>,
    pub stderr: Vec<u8>,
    pub outcome: Result<(), ExecError>,
    /// Pause between stdout chunks.
    pub chunk_delay: Option<Duration>,
}

impl Script {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout_chunks: vec![stdout.into()],
            stderr: Vec::new(),
            outcome: Ok(()),
            chunk_delay: None,
        }
    }

    pub fn chunked(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            stdout_chunks: chunks,
            stderr: Vec::new(),
            outcome: Ok(()),
            chunk_delay: None,
        }
    }

    pub fn failing(stdout: impl Into<Vec<u8>>, error: ExecError) -> Self {
        Self {
            stdout_chunks: vec![stdout.into()],
            stderr: Vec::new(),
            outcome: Err(error),
            chunk_delay: None,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// One recorded `open` call.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub request: ExecRequest,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct EndpointState {
    /// Per-worker scripts, consumed in order. The last one repeats.
    scripts: HashMap<String, VecDeque<Script>>,
    calls: Vec<ExecCall>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Exec endpoint that plays back scripts over in-memory pipes. Workers with
/// no script behave like missing pods and fail at setup.
#[derive(Clone, Default)]
pub struct ScriptedEndpoint {
    state: Arc<Mutex<EndpointState>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, worker: &str, scripts: Vec<Script>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(worker.to_string(), scripts.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn workers_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.request.worker).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn next_script(&self, request: &ExecRequest) -> Option<Script> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ExecCall {
            request: request.clone(),
            at: Instant::now(),
        });
        let queue = state.scripts.get_mut(&request.worker)?;
        let script = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }?;
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        Some(script)
    }
}

#[async_trait]
impl ExecEndpoint for ScriptedEndpoint {
    async fn open(&self, request: &ExecRequest) -> Result<ExecSession, ExecError> {
        let Some(script) = self.next_script(request) else {
            return Err(ExecError::Setup {
                worker: request.worker.clone(),
                reason: format!("pods \"{}\" not found", request.worker),
            });
        };

        // Small pipe buffers so the writer blocks unless the client drains.
        let (stdout_remote, stdout_local) = tokio::io::duplex(64);
        let (stderr_remote, stderr_local) = tokio::io::duplex(64);
        let (stdin_local, stdin_remote) = tokio::io::duplex(64);

        let Script {
            stdout_chunks,
            stderr,
            outcome,
            chunk_delay,
        } = script;
        let writer = tokio::spawn(async move {
            let mut out = stdout_remote;
            let mut err = stderr_remote;
            for chunk in stdout_chunks {
                if let Some(delay) = chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                out.write_all(&chunk).await?;
            }
            err.write_all(&stderr).await?;
            drop(stdin_remote);
            std::io::Result::Ok(())
        });

        let state = Arc::clone(&self.state);
        let completion: Completion = Box::pin(async move {
            writer
                .await
                .expect("writer task panicked")
                .expect("pipe closed early");
            state.lock().unwrap().in_flight -= 1;
            outcome
        });

        Ok(ExecSession {
            stdin: request
                .stdin
                .then(|| Box::new(stdin_local) as BoxedWriter),
            stdout: request
                .stdout
                .then(|| Box::new(stdout_local) as BoxedReader),
            stderr: request
                .stderr
                .then(|| Box::new(stderr_local) as BoxedReader),
            completion,
        })
    }
}
