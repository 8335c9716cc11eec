//! Error taxonomy for the workbench pipeline

use workbench_sdk::PipelineState;

use crate::llm::CompletionError;
use crate::sandbox::SandboxError;

/// Result alias used across the pipeline
pub type Result<T> = std::result::Result<T, WorkbenchError>;

/// Errors surfaced by pipeline operations
#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    /// Required form fields left blank (labels listed)
    #[error("missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    /// Domain id not registered
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// Domain registry or configuration problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// LLM stream failed or never produced parseable artifacts
    #[error("generation failed: {0}")]
    Generation(String),

    /// Neither a user override nor a domain default evaluation prompt
    #[error("no evaluation prompt available")]
    MissingPrompt,

    /// The code-generation response contained no usable code block
    #[error("no ```{language} code block found in the generated response")]
    NoCodeBlock { language: String },

    /// Sandbox reported an error (including timeouts)
    #[error("{0}")]
    Execution(String),

    /// Synthesis requested before any artifact has an outcome
    #[error("nothing to synthesize: no artifact has been tested yet")]
    NothingToSynthesize,

    /// Illegal state machine move
    #[error("artifact {artifact} cannot move from {from} to {to}")]
    InvalidTransition {
        artifact: usize,
        from: PipelineState,
        to: PipelineState,
    },

    #[error("artifact {0} not found")]
    ArtifactNotFound(usize),

    #[error("no dataset loaded")]
    NoDataset,

    /// Dataset could not be loaded
    #[error("dataset error: {0}")]
    Dataset(String),

    /// SQLite source had no tables
    #[error("no tables found in database")]
    NoTablesFound,

    /// Dataset, domain or artifact list changed while the run was in flight
    #[error("session changed while the run was in flight")]
    Stale,

    #[error("operation cancelled")]
    Cancelled,
}

impl WorkbenchError {
    /// Errors a user can fix by editing input and retrying
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Generation(_)
                | Self::MissingPrompt
                | Self::NoCodeBlock { .. }
                | Self::Execution(_)
                | Self::NothingToSynthesize
        )
    }
}

impl From<SandboxError> for WorkbenchError {
    fn from(err: SandboxError) -> Self {
        Self::Execution(err.to_string())
    }
}

impl From<CompletionError> for WorkbenchError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Cancelled => Self::Cancelled,
            other => Self::Generation(other.to_string()),
        }
    }
}

/// Domain configuration bugs, raised when a domain is registered or loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("domain '{0}' is already registered")]
    DuplicateDomain(String),

    #[error("domain '{domain}': response schema has no array property '{key}'")]
    ArrayKeyMismatch { domain: String, key: String },

    #[error("domain '{domain}': invalid response schema: {reason}")]
    InvalidSchema { domain: String, reason: String },

    #[error("domain '{domain}': {reason}")]
    Invalid { domain: String, reason: String },

    #[error("failed to read domain file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("invalid setting {key}={value}: {reason}")]
    Setting {
        key: String,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_labels() {
        let err = WorkbenchError::Validation {
            missing: vec!["Analysis context".to_string(), "Target".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required fields: Analysis context, Target"
        );
    }

    #[test]
    fn test_sandbox_errors_become_execution_errors() {
        let err: WorkbenchError = SandboxError::Timeout { millis: 50 }.into();
        assert!(matches!(err, WorkbenchError::Execution(ref msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_completion_errors_become_generation_errors() {
        let err: WorkbenchError = CompletionError::Transport("connection reset".to_string()).into();
        assert!(matches!(err, WorkbenchError::Generation(_)));

        let err: WorkbenchError = CompletionError::Cancelled.into();
        assert!(matches!(err, WorkbenchError::Cancelled));
    }
}
