//! Sandboxed execution of generated code
//!
//! - **protocol**: request/response messages exchanged with a worker
//! - **worker**: the [`SandboxWorker`]/[`WorkerFactory`] seam
//! - **process**: python subprocess workers speaking JSON lines
//! - **inline**: in-process workers driven by a Rust closure
//! - **bridge**: timeouts, correlation and worker lifecycle

pub mod bridge;
pub mod inline;
pub mod process;
pub mod protocol;
pub mod worker;

pub use bridge::{ExecuteOptions, ExecutionBridge, WorkerMode};
pub use inline::{InlineReply, InlineWorkerFactory};
pub use process::PythonWorkerFactory;
pub use protocol::{ExecutionOutcome, ExecutionRequest, Row, WorkerResponse};
pub use worker::{SandboxWorker, WorkerFactory};

/// Errors raised while running code in a sandbox worker
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to start sandbox worker: {0}")]
    Spawn(String),

    #[error("sandbox i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Exception raised by the executed code, as reported by the worker
    #[error("{0}")]
    Runtime(String),

    #[error("sandbox worker exited before responding")]
    WorkerExited,

    #[error("sandbox protocol error: {0}")]
    Protocol(String),
}
