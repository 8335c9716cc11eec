//! Execution bridge: runs code in sandbox workers with a deadline
//!
//! Every call gets a fresh correlation id and resolves exactly once, with the
//! worker's result, its error, or a timeout. Two worker strategies are
//! supported:
//!
//! - [`WorkerMode::Ephemeral`] (default): a new worker per call, terminated
//!   when the call resolves
//! - [`WorkerMode::Shared`]: one long-lived worker multiplexed by correlation
//!   id; a timeout discards it, and calls still waiting on it are resubmitted
//!   to its replacement under their original deadline
//!
//! The deadline starts once the worker reports ready, so interpreter startup
//! is bounded separately by [`STARTUP_TIMEOUT`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

use super::protocol::{ExecutionOutcome, ExecutionRequest, Row, WorkerResponse};
use super::worker::{SandboxWorker, WorkerFactory};
use super::SandboxError;

/// Default deadline for one execution
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest a worker may take to become ready
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Worker lifecycle strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    #[default]
    Ephemeral,
    Shared,
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMode::Ephemeral => f.write_str("ephemeral"),
            WorkerMode::Shared => f.write_str("shared"),
        }
    }
}

impl FromStr for WorkerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ephemeral" => Ok(WorkerMode::Ephemeral),
            "shared" => Ok(WorkerMode::Shared),
            other => Err(format!("expected 'ephemeral' or 'shared', got '{}'", other)),
        }
    }
}

/// Per-call overrides of the bridge defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub mode: Option<WorkerMode>,
    pub timeout: Option<Duration>,
}

impl ExecuteOptions {
    pub fn with_mode(mut self, mode: WorkerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What a shared-worker caller is told about its request
enum Delivery {
    Done(Result<ExecutionOutcome, SandboxError>),
    /// The worker was replaced before answering; submit again
    Resubmit,
}

type PendingMap = DashMap<String, oneshot::Sender<Delivery>>;

/// Long-lived worker plus the callers waiting on it
struct SharedWorker {
    worker: Mutex<Box<dyn SandboxWorker>>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
}

impl SharedWorker {
    /// Resolve every waiting caller with `WorkerExited`
    fn fail_pending(pending: &PendingMap) {
        Self::release_pending(pending, || Delivery::Done(Err(SandboxError::WorkerExited)));
    }

    fn release_pending(pending: &PendingMap, delivery: impl Fn() -> Delivery) {
        let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = pending.remove(&id) {
                let _ = tx.send(delivery());
            }
        }
    }
}

/// Dispatches code to sandbox workers
pub struct ExecutionBridge {
    factory: Arc<dyn WorkerFactory>,
    default_timeout: Duration,
    default_mode: WorkerMode,
    shared: Mutex<Option<Arc<SharedWorker>>>,
    dropped: Arc<AtomicUsize>,
}

impl ExecutionBridge {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            factory,
            default_timeout: DEFAULT_TIMEOUT,
            default_mode: WorkerMode::default(),
            shared: Mutex::new(None),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: WorkerMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn default_mode(&self) -> WorkerMode {
        self.default_mode
    }

    /// Responses that arrived for no waiting caller (late or unknown ids)
    pub fn dropped_responses(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Run `code` against `data` with `context` bound as globals.
    ///
    /// Returns the plain-JSON value of the code's final expression. Exceptions
    /// raised by the code come back as [`SandboxError::Runtime`].
    pub async fn execute(
        &self,
        code: impl Into<String>,
        data: Arc<Vec<Row>>,
        context: Value,
        options: ExecuteOptions,
    ) -> Result<Value, SandboxError> {
        let request = ExecutionRequest::new(code, data, context);
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let mode = options.mode.unwrap_or(self.default_mode);

        tracing::debug!(
            request = %request.id,
            %mode,
            rows = request.data.len(),
            timeout_ms = timeout.as_millis() as u64,
            "dispatching sandbox execution"
        );

        let outcome = match mode {
            WorkerMode::Ephemeral => self.execute_ephemeral(&request, timeout).await,
            WorkerMode::Shared => self.execute_shared(&request, timeout).await,
        };

        match &outcome {
            Ok(outcome) => tracing::debug!(request = %outcome.id(), "sandbox execution finished"),
            Err(e) => tracing::warn!(request = %request.id, error = %e, "sandbox execution failed"),
        }

        outcome?.into_result()
    }

    /// Terminate the shared worker, if one is running
    pub async fn shutdown(&self) {
        let shared = self.shared.lock().await.take();
        if let Some(shared) = shared {
            shared.alive.store(false, Ordering::SeqCst);
            shared.worker.lock().await.terminate().await;
            SharedWorker::fail_pending(&shared.pending);
        }
    }

    async fn execute_ephemeral(
        &self,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let mut worker = self.factory.spawn().await?;
        let mut responses = match worker.take_responses() {
            Some(responses) => responses,
            None => {
                worker.terminate().await;
                return Err(SandboxError::Protocol(
                    "worker response channel unavailable".to_string(),
                ));
            }
        };
        if let Err(e) = wait_ready(worker.as_mut()).await {
            worker.terminate().await;
            return Err(e);
        }

        let result = tokio::time::timeout(
            timeout,
            await_response(worker.as_mut(), &mut responses, request, &self.dropped),
        )
        .await;

        // Never reused, whatever the outcome
        worker.terminate().await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(timed_out(timeout)),
        }
    }

    async fn execute_shared(
        &self,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let mut deadline: Option<Instant> = None;

        loop {
            let shared = self.shared_worker().await?;
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + timeout);
            let (tx, rx) = oneshot::channel();
            shared.pending.insert(request.id.clone(), tx);

            let submitted = shared.worker.lock().await.submit(request).await;
            if let Err(e) = submitted {
                shared.pending.remove(&request.id);
                if !shared.alive.load(Ordering::SeqCst) {
                    // Replaced between lookup and submit
                    continue;
                }
                self.discard(&shared, false).await;
                return Err(e);
            }

            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(Delivery::Done(outcome))) => return outcome,
                Ok(Ok(Delivery::Resubmit)) => {
                    tracing::debug!(request = %request.id, "resubmitting to replacement shared worker");
                }
                Ok(Err(_)) => return Err(SandboxError::WorkerExited),
                Err(_) => {
                    // Late responses find no pending entry and are dropped
                    shared.pending.remove(&request.id);
                    self.discard(&shared, true).await;
                    return Err(timed_out(timeout));
                }
            }
        }
    }

    /// Current shared worker, starting one if none is alive
    async fn shared_worker(&self) -> Result<Arc<SharedWorker>, SandboxError> {
        let mut slot = self.shared.lock().await;
        if let Some(shared) = slot.as_ref() {
            if shared.alive.load(Ordering::SeqCst) {
                return Ok(shared.clone());
            }
        }

        let mut worker = self.factory.spawn().await?;
        let responses = match worker.take_responses() {
            Some(responses) => responses,
            None => {
                worker.terminate().await;
                return Err(SandboxError::Protocol(
                    "worker response channel unavailable".to_string(),
                ));
            }
        };
        if let Err(e) = wait_ready(worker.as_mut()).await {
            worker.terminate().await;
            return Err(e);
        }

        let shared = Arc::new(SharedWorker {
            worker: Mutex::new(worker),
            pending: Arc::new(DashMap::new()),
            alive: Arc::new(AtomicBool::new(true)),
        });

        tokio::spawn(route_responses(
            responses,
            shared.pending.clone(),
            shared.alive.clone(),
            self.dropped.clone(),
        ));

        tracing::info!("started shared sandbox worker");
        *slot = Some(shared.clone());
        Ok(shared)
    }

    /// Terminate `shared` and forget it if it is still the current worker.
    ///
    /// With `resubmit`, callers still waiting on it retry on a new worker;
    /// otherwise they fail with `WorkerExited`.
    async fn discard(&self, shared: &Arc<SharedWorker>, resubmit: bool) {
        {
            let mut slot = self.shared.lock().await;
            if slot.as_ref().map_or(false, |current| Arc::ptr_eq(current, shared)) {
                *slot = None;
            }
        }
        shared.alive.store(false, Ordering::SeqCst);
        shared.worker.lock().await.terminate().await;
        if resubmit {
            SharedWorker::release_pending(&shared.pending, || Delivery::Resubmit);
        } else {
            SharedWorker::fail_pending(&shared.pending);
        }
        tracing::info!(resubmit, "discarded shared sandbox worker");
    }
}

async fn wait_ready(worker: &mut dyn SandboxWorker) -> Result<(), SandboxError> {
    match tokio::time::timeout(STARTUP_TIMEOUT, worker.ready()).await {
        Ok(ready) => ready,
        Err(_) => Err(SandboxError::Spawn(format!(
            "worker not ready after {} s",
            STARTUP_TIMEOUT.as_secs()
        ))),
    }
}

fn timed_out(timeout: Duration) -> SandboxError {
    SandboxError::Timeout {
        millis: timeout.as_millis() as u64,
    }
}

/// Submit to a dedicated worker and wait for the response carrying this id
async fn await_response(
    worker: &mut dyn SandboxWorker,
    responses: &mut mpsc::UnboundedReceiver<WorkerResponse>,
    request: &ExecutionRequest,
    dropped: &AtomicUsize,
) -> Result<ExecutionOutcome, SandboxError> {
    worker.submit(request).await?;

    loop {
        match responses.recv().await {
            Some(response) if response.id == request.id => return response.into_outcome(),
            Some(response) => {
                dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(response = %response.id, expected = %request.id, "dropping stray sandbox response");
            }
            None => return Err(SandboxError::WorkerExited),
        }
    }
}

/// Deliver shared-worker responses to their waiting callers
async fn route_responses(
    mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
) {
    while let Some(response) = responses.recv().await {
        match pending.remove(&response.id) {
            Some((_, tx)) => {
                let _ = tx.send(Delivery::Done(response.into_outcome()));
            }
            None => {
                dropped.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(response = %response.id, "dropping sandbox response with no waiting caller");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    SharedWorker::fail_pending(&pending);
    tracing::debug!("shared sandbox worker response channel closed");
}
