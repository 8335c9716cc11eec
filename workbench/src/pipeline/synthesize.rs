//! Cross-artifact synthesis request

use crate::artifact::{ArtifactCard, TestedArtifact};
use crate::domain::{Domain, SynthesisContext};
use crate::error::{Result, WorkbenchError};
use crate::llm::CompletionRequest;

/// Artifacts whose outcome panel has content, errors included
pub fn tested_artifacts(cards: &[ArtifactCard]) -> Vec<TestedArtifact> {
    cards
        .iter()
        .filter(|card| !card.outcome_text.trim().is_empty())
        .map(|card| TestedArtifact {
            artifact: card.artifact.clone(),
            outcome: card.outcome.clone(),
            outcome_text: card.outcome_text.clone(),
        })
        .collect()
}

pub fn synthesis_request(domain: &Domain, tested: Vec<TestedArtifact>) -> Result<CompletionRequest> {
    if tested.is_empty() {
        return Err(WorkbenchError::NothingToSynthesize);
    }
    let ctx = SynthesisContext { tested };
    Ok(CompletionRequest::new(
        domain.synthesis.system.resolve(&ctx),
        domain.synthesis.user.resolve(&ctx),
    ))
}
