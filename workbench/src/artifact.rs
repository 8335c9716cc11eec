//! Artifacts proposed by the LLM and their per-session test cards

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use workbench_sdk::PipelineState;

use crate::error::{Result, WorkbenchError};
use crate::outcome::Outcome;

/// Which JSON keys of an artifact hold its title and details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFields {
    pub title: String,
    pub details: String,
}

impl ArtifactFields {
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: details.into(),
        }
    }
}

impl Default for ArtifactFields {
    fn default() -> Self {
        Self::new("title", "details")
    }
}

/// One proposed hypothesis, experiment or check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub title: String,
    pub details: String,
    /// Full JSON object as generated, including domain-specific keys
    pub raw: Value,
}

impl Artifact {
    /// Build from a generated array element; `None` unless it is an object
    /// with a string title
    pub fn from_value(value: Value, fields: &ArtifactFields) -> Option<Self> {
        let object = value.as_object()?;
        let title = field_text(object.get(&fields.title)?)?;
        let details = object
            .get(&fields.details)
            .and_then(field_text)
            .unwrap_or_default();

        Some(Self {
            title,
            details,
            raw: value,
        })
    }

    /// String-valued raw field, for templates
    pub fn field(&self, key: &str) -> Option<String> {
        self.raw.get(key).and_then(field_text)
    }
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        _ => None,
    }
}

/// An artifact together with everything its test run produced
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactCard {
    pub artifact: Arc<Artifact>,
    pub state: PipelineState,
    /// Streamed code-generation response
    pub commentary: String,
    /// Code sent to the sandbox, entry-point call included
    pub code: Option<String>,
    pub outcome: Option<Outcome>,
    /// Interpretation markdown, summary line, or the error text
    pub outcome_text: String,
    pub error: Option<String>,
}

impl ArtifactCard {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact: Arc::new(artifact),
            state: PipelineState::Idle,
            commentary: String::new(),
            code: None,
            outcome: None,
            outcome_text: String::new(),
            error: None,
        }
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition(&mut self, index: usize, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(WorkbenchError::InvalidTransition {
                artifact: index,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Back to `Idle` with all run output cleared
    pub fn reset(&mut self) {
        self.state = PipelineState::Idle;
        self.commentary.clear();
        self.code = None;
        self.outcome = None;
        self.outcome_text.clear();
        self.error = None;
    }

    /// Whether a "run all" should pick this card up
    pub fn is_untested(&self) -> bool {
        self.state == PipelineState::Idle && self.outcome_text.trim().is_empty()
    }
}

/// An artifact with a non-empty outcome, as fed to synthesis
#[derive(Debug, Clone)]
pub struct TestedArtifact {
    pub artifact: Arc<Artifact>,
    pub outcome: Option<Outcome>,
    pub outcome_text: String,
}
