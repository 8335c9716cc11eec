//! In-process sandbox workers
//!
//! Requests are answered by a Rust closure instead of an interpreter. Used for
//! dry runs and tests, where a python runtime is not available.

use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use workbench_sdk::async_trait;

use super::protocol::{ExecutionRequest, WorkerResponse};
use super::worker::{SandboxWorker, WorkerFactory};
use super::SandboxError;

/// What an inline worker answers, and when
#[derive(Debug, Clone, PartialEq)]
pub struct InlineReply {
    pub outcome: Result<Value, String>,
    pub delay: Duration,
}

impl InlineReply {
    pub fn ok(result: Value) -> Self {
        Self {
            outcome: Ok(result),
            delay: Duration::ZERO,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            delay: Duration::ZERO,
        }
    }

    /// Answer only after `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Maps a request to its reply; `None` means the worker never answers
pub type InlineHandler = dyn Fn(&ExecutionRequest) -> Option<InlineReply> + Send + Sync;

/// Spawns [`InlineWorker`]s sharing one handler
#[derive(Clone)]
pub struct InlineWorkerFactory {
    handler: Arc<InlineHandler>,
    startup: Duration,
    spawned: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

impl InlineWorkerFactory {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ExecutionRequest) -> Option<InlineReply> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            startup: Duration::ZERO,
            spawned: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Workers become ready only after `startup`
    pub fn with_startup(mut self, startup: Duration) -> Self {
        self.startup = startup;
        self
    }

    /// Workers created so far
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers terminated so far
    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for InlineWorkerFactory {
    async fn spawn(&self) -> Result<Box<dyn SandboxWorker>, SandboxError> {
        let worker_number = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(worker = worker_number, "inline sandbox worker started");

        Ok(Box::new(InlineWorker {
            handler: self.handler.clone(),
            startup: self.startup,
            tx: Some(tx),
            rx: Some(rx),
            terminated: self.terminated.clone(),
        }))
    }
}

/// Worker answering each request from a spawned task
pub struct InlineWorker {
    handler: Arc<InlineHandler>,
    startup: Duration,
    tx: Option<mpsc::UnboundedSender<WorkerResponse>>,
    rx: Option<mpsc::UnboundedReceiver<WorkerResponse>>,
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxWorker for InlineWorker {
    async fn ready(&mut self) -> Result<(), SandboxError> {
        if !self.startup.is_zero() {
            tokio::time::sleep(self.startup).await;
        }
        Ok(())
    }

    async fn submit(&mut self, request: &ExecutionRequest) -> Result<(), SandboxError> {
        let tx = self.tx.clone().ok_or(SandboxError::WorkerExited)?;
        let Some(reply) = (self.handler)(request) else {
            return Ok(());
        };

        let id = request.id.clone();
        tokio::spawn(async move {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            let response = match reply.outcome {
                Ok(result) => WorkerResponse::result(id, result),
                Err(error) => WorkerResponse::error(id, error),
            };
            // Receiver may be gone after a timeout
            let _ = tx.send(response);
        });
        Ok(())
    }

    fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerResponse>> {
        self.rx.take()
    }

    async fn terminate(&mut self) {
        if self.tx.take().is_some() {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }
}
