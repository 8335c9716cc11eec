//! Worker abstraction used by the execution bridge

use tokio::sync::mpsc;
use workbench_sdk::async_trait;

use super::protocol::{ExecutionRequest, WorkerResponse};
use super::SandboxError;

/// An isolated runtime that executes requests and answers by correlation id.
///
/// Responses arrive on the channel returned by [`SandboxWorker::take_responses`],
/// in whatever order the worker finishes them. The channel closes when the
/// worker exits.
#[async_trait]
pub trait SandboxWorker: Send {
    /// Resolves once the worker can take requests
    async fn ready(&mut self) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Hand a request to the worker without waiting for its answer
    async fn submit(&mut self, request: &ExecutionRequest) -> Result<(), SandboxError>;

    /// Response channel; `None` once taken
    fn take_responses(&mut self) -> Option<mpsc::UnboundedReceiver<WorkerResponse>>;

    /// Stop the worker, abandoning anything still running
    async fn terminate(&mut self);
}

/// Creates fresh workers
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn spawn(&self) -> Result<Box<dyn SandboxWorker>, SandboxError>;
}
