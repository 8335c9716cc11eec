//! Types shared between the workbench pipeline and whatever front-end drives it.
//!
//! - [`FieldSchema`]: the input form a domain asks the user to fill in
//! - [`PipelineState`]: the per-artifact test state machine
//! - [`PipelineEvent`]: structured progress events a front-end renders

// Re-export async trait for convenience
pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Values submitted through a domain's input form, keyed by field id
pub type FormValues = BTreeMap<String, String>;

/// Input field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl FieldSchema {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            required: false,
            placeholder: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn placeholder(mut self, text: impl Into<String>) -> Self {
        self.placeholder = Some(text.into());
        self
    }
}

/// Field kind enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    TextArea,
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Select {
        options: Vec<String>,
    },
}

/// Labels of required fields whose submitted value is missing or blank
pub fn missing_required(fields: &[FieldSchema], values: &FormValues) -> Vec<String> {
    fields
        .iter()
        .filter(|field| field.required)
        .filter(|field| {
            values
                .get(&field.id)
                .map_or(true, |value| value.trim().is_empty())
        })
        .map(|field| field.label.clone())
        .collect()
}

/// Per-artifact test state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    GeneratingCode,
    Executing,
    Interpreting,
    Done,
    Failed,
}

impl PipelineState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Done` and `Failed` are terminal until an explicit reset to `Idle`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, GeneratingCode)
                | (GeneratingCode, Executing)
                | (Executing, Interpreting)
                | (Interpreting, Done)
                | (GeneratingCode | Executing | Interpreting, Failed)
                | (Done | Failed, Idle)
        )
    }

    /// True while a test run owns the artifact
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::GeneratingCode | PipelineState::Executing | PipelineState::Interpreting
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::GeneratingCode => "generating_code",
            PipelineState::Executing => "executing",
            PipelineState::Interpreting => "interpreting",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Structured events emitted while the pipeline runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Active domain switched; artifacts were discarded
    DomainChanged { domain: String },
    /// New dataset loaded
    DatasetLoaded { rows: usize, columns: usize },
    /// Dataset replaced by a cleaned snapshot
    DatasetReplaced {
        rows_before: usize,
        rows_after: usize,
        undo_depth: usize,
    },
    /// Previous snapshot restored
    DatasetRestored { rows: usize, undo_depth: usize },
    /// Artifact list grew (or was replaced) during generation
    ArtifactsUpdated { artifacts: Vec<serde_json::Value> },
    /// Artifact generation failed
    GenerationFailed { error: String },
    /// Artifact moved to a new pipeline state
    StateChanged {
        artifact: usize,
        state: PipelineState,
    },
    /// Streaming commentary from the code-generation call
    CommentaryDelta { artifact: usize, delta: String },
    /// Code block extracted and about to run
    CodeExtracted { artifact: usize, code: String },
    /// Sandbox returned a normalized outcome
    ExecutionFinished {
        artifact: usize,
        success: bool,
        score: serde_json::Value,
    },
    /// Streaming interpretation markdown
    OutcomeDelta { artifact: usize, delta: String },
    /// Test run failed; the error is shown in the outcome panel
    ArtifactFailed { artifact: usize, error: String },
    /// Streaming synthesis markdown
    SynthesisDelta { delta: String },
    /// Synthesis finished
    SynthesisCompleted,
    /// Synthesis failed
    SynthesisFailed { error: String },
}

impl PipelineEvent {
    /// Emit this event to stderr for a front-end process to parse
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            use std::io::Write;
            eprintln!("__WB_EVENT__:{}", json);
            let _ = std::io::stderr().flush();
        }
    }

    /// Parse a line previously written by [`PipelineEvent::emit`]
    pub fn parse_line(line: &str) -> Option<Self> {
        let json = line.strip_prefix("__WB_EVENT__:")?;
        serde_json::from_str(json).ok()
    }
}
