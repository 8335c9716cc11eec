//! Artifact generation: request building and incremental artifact parsing

use serde_json::Value;
use workbench_sdk::{missing_required, FormValues};

use crate::artifact::Artifact;
use crate::domain::{Domain, GenerationContext};
use crate::error::{Result, WorkbenchError};
use crate::llm::CompletionRequest;
use crate::partial_json::{artifact_array, parse_partial};

/// Reject submissions with blank required fields
pub fn validate_form(domain: &Domain, form_values: &FormValues) -> Result<()> {
    let missing = missing_required(&domain.input_fields, form_values);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkbenchError::Validation { missing })
    }
}

/// Build the generation request for a validated form
pub fn generation_request(
    domain: &Domain,
    form_values: &FormValues,
    dataset_summary: &str,
) -> Result<CompletionRequest> {
    validate_form(domain, form_values)?;

    let ctx = GenerationContext {
        form_values: form_values.clone(),
        dataset_summary: dataset_summary.to_string(),
    };
    Ok(CompletionRequest::new(
        domain.generation.system.resolve(&ctx),
        domain.generation.user_prompt(&ctx),
    )
    .with_response_format(domain.response.response_format()))
}

/// Turns the growing response text into the list of complete artifacts
pub struct ArtifactCollector<'a> {
    domain: &'a Domain,
    artifacts: Vec<Artifact>,
    /// Array elements already looked at, accepted or not
    consumed: usize,
    key_seen: bool,
}

impl<'a> ArtifactCollector<'a> {
    pub fn new(domain: &'a Domain) -> Self {
        Self {
            domain,
            artifacts: Vec::new(),
            consumed: 0,
            key_seen: false,
        }
    }

    /// Re-parse the accumulated text; returns true when artifacts were added
    pub fn update(&mut self, text: &str) -> bool {
        let Some(document) = parse_partial(text) else {
            return false;
        };
        let Some(items) = artifact_array(&document, &self.domain.response.array_key) else {
            return false;
        };
        self.key_seen = true;

        let before = self.artifacts.len();
        for (position, item) in items.into_iter().enumerate().skip(self.consumed) {
            self.consumed = position + 1;
            self.accept(position, item);
        }
        self.artifacts.len() > before
    }

    fn accept(&mut self, position: usize, item: Value) {
        if !self.domain.accepts_artifact(&item) {
            tracing::warn!(domain = %self.domain.id, position, "generated artifact does not match schema, skipping");
            return;
        }
        match Artifact::from_value(item, &self.domain.artifact_fields) {
            Some(artifact) => self.artifacts.push(artifact),
            None => tracing::warn!(
                domain = %self.domain.id,
                position,
                title_key = %self.domain.artifact_fields.title,
                "generated artifact has no title, skipping"
            ),
        }
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Raw JSON of the accepted artifacts, for events
    pub fn raw(&self) -> Vec<Value> {
        self.artifacts.iter().map(|a| a.raw.clone()).collect()
    }

    /// Final list; fails if the array key never appeared
    pub fn finish(self) -> Result<Vec<Artifact>> {
        if !self.key_seen {
            return Err(WorkbenchError::Generation(format!(
                "response did not contain a \"{}\" array",
                self.domain.response.array_key
            )));
        }
        Ok(self.artifacts)
    }
}
