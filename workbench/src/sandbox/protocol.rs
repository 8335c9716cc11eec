//! Messages exchanged with a sandbox worker
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id": "...", "code": "...", "data": [{...}, ...], "context": {...}}
//! <- {"id": "...", "result": ...}    or    {"id": "...", "error": "..."}
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::SandboxError;

/// One dataset row: column name to scalar
pub type Row = Map<String, Value>;

/// Code to run against a dataset snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Correlation id, fresh per request
    pub id: String,
    pub code: String,
    /// Bound as `data` inside the sandbox
    pub data: Arc<Vec<Row>>,
    /// Keys are bound as globals before `code` runs
    pub context: Value,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, data: Arc<Vec<Row>>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            data,
            context,
        }
    }
}

/// Raw response line from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: String,
    /// `Some(Value::Null)` when the worker sent an explicit `null` result
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl WorkerResponse {
    pub fn result(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    /// Check that exactly one of `result`/`error` is present
    pub fn into_outcome(self) -> Result<ExecutionOutcome, SandboxError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(ExecutionOutcome::Success {
                id: self.id,
                result,
            }),
            (None, Some(error)) => Ok(ExecutionOutcome::Failure { id: self.id, error }),
            (Some(_), Some(_)) => Err(SandboxError::Protocol(format!(
                "response {} carries both result and error",
                self.id
            ))),
            (None, None) => Err(SandboxError::Protocol(format!(
                "response {} carries neither result nor error",
                self.id
            ))),
        }
    }
}

/// Validated worker answer
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success { id: String, result: Value },
    Failure { id: String, error: String },
}

impl ExecutionOutcome {
    pub fn id(&self) -> &str {
        match self {
            ExecutionOutcome::Success { id, .. } | ExecutionOutcome::Failure { id, .. } => id,
        }
    }

    /// Sandbox exceptions become [`SandboxError::Runtime`]
    pub fn into_result(self) -> Result<Value, SandboxError> {
        match self {
            ExecutionOutcome::Success { result, .. } => Ok(result),
            ExecutionOutcome::Failure { error, .. } => Err(SandboxError::Runtime(error)),
        }
    }
}
