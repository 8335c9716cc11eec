//! Python subprocess workers
//!
//! Each worker is a `python -u -c <worker script>` child process. Once its
//! imports are done it prints a `{"ready": true}` line; after that, requests
//! are written to its stdin as JSON lines and responses read from its stdout.
//! Anything the executed code prints goes to the child's stderr and is
//! forwarded to `tracing` at debug level.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use workbench_sdk::async_trait;

use super::protocol::{ExecutionRequest, WorkerResponse};
use super::worker::{SandboxWorker, WorkerFactory};
use super::SandboxError;

const WORKER_SCRIPT: &str = include_str!("worker.py");
const READY_LINE: &str = r#"{"ready": true}"#;

/// Spawns python worker processes
#[derive(Debug, Clone)]
pub struct PythonWorkerFactory {
    program: String,
}

impl PythonWorkerFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PythonWorkerFactory {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl WorkerFactory for PythonWorkerFactory {
    async fn spawn(&self) -> Result<Box<dyn SandboxWorker>, SandboxError> {
        let mut child = Command::new(&self.program)
            .arg("-u")
            .arg("-c")
            .arg(WORKER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.program, e)))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Spawn("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Spawn("worker stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Spawn("worker stderr unavailable".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        // Spawn stdout parser task; the channel closes when the process exits
        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == READY_LINE {
                    if let Some(ready) = ready_tx.take() {
                        let _ = ready.send(());
                    }
                    continue;
                }
                match serde_json::from_str::<WorkerResponse>(&line) {
                    Ok(response) => {
                        if tx.send(response).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(?pid, error = %e, "ignoring malformed worker output: {}", line)
                    }
                }
            }
            tracing::debug!(?pid, "sandbox worker stdout closed");
        });

        // Spawn stderr forwarder task
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(?pid, "sandbox: {}", line);
            }
        });

        tracing::debug!(?pid, program = %self.program, "python sandbox worker started");

        Ok(Box::new(PythonWorker {
            child,
            stdin: Some(stdin),
            responses: Some(rx),
            ready: Some(ready_rx),
        }))
    }
}

/// A running python worker process
pub struct PythonWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Option<mpsc::UnboundedReceiver<WorkerResponse>>,
    ready: Option<oneshot::Receiver<()>>,
}

#[async_trait]
impl SandboxWorker for PythonWorker {
    async fn ready(&mut self) -> Result<(), SandboxError> {
        match self.ready.take() {
            // Sender dropped: stdout closed before the worker came up
            Some(ready) => ready.await.map_err(|_| SandboxError::WorkerExited),
            None => Ok(()),
        }
    }

    async fn submit(&mut self, request: &ExecutionRequest) -> Result<(), SandboxError> {
        let stdin = self.stdin.as_mut().ok_or(SandboxError::WorkerExited)?;
        let mut line = serde_json::to_vec(request)
            .map_err(|e| SandboxError::Protocol(format!("failed to encode request: {}", e)))?;
        line.push(b'\n');

        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerResponse>> {
        self.responses.take()
    }

    async fn terminate(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "sandbox worker already exited");
        }
    }
}
