//! Prompt sources and the contexts they are resolved against

use std::fmt;
use std::sync::Arc;
use workbench_sdk::FormValues;

use crate::artifact::{Artifact, TestedArtifact};
use crate::outcome::Outcome;

/// A prompt that is either fixed text or computed from a context
pub enum PromptSource<C> {
    Static(String),
    Templated(Arc<dyn Fn(&C) -> String + Send + Sync>),
}

impl<C> PromptSource<C> {
    pub fn fixed(text: impl Into<String>) -> Self {
        PromptSource::Static(text.into())
    }

    pub fn templated<F>(render: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        PromptSource::Templated(Arc::new(render))
    }

    pub fn resolve(&self, ctx: &C) -> String {
        match self {
            PromptSource::Static(text) => text.clone(),
            PromptSource::Templated(render) => render(ctx),
        }
    }
}

impl<C: TemplateVars + 'static> PromptSource<C> {
    /// `{placeholder}` template filled from the context's variables
    pub fn template(text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.contains('{') {
            return PromptSource::Static(text);
        }
        PromptSource::templated(move |ctx: &C| render_template(&text, ctx))
    }
}

impl<C> Clone for PromptSource<C> {
    fn clone(&self) -> Self {
        match self {
            PromptSource::Static(text) => PromptSource::Static(text.clone()),
            PromptSource::Templated(render) => PromptSource::Templated(render.clone()),
        }
    }
}

impl<C> fmt::Debug for PromptSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptSource::Static(text) => f.debug_tuple("Static").field(text).finish(),
            PromptSource::Templated(_) => f.write_str("Templated(..)"),
        }
    }
}

/// System and user prompt resolved against the same context
#[derive(Debug, Clone)]
pub struct PromptPair<C> {
    pub system: PromptSource<C>,
    pub user: PromptSource<C>,
}

impl<C> PromptPair<C> {
    pub fn new(system: PromptSource<C>, user: PromptSource<C>) -> Self {
        Self { system, user }
    }
}

/// Named values available to `{placeholder}` templates
pub trait TemplateVars {
    fn var(&self, name: &str) -> Option<String>;
}

/// Replace `{name}` with the context's value. Unknown placeholders are kept
/// verbatim; `{{` and `}}` produce literal braces.
pub fn render_template(template: &str, vars: &dyn TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find(|c: char| c == '}' || c == '{') {
            Some(end) if tail.as_bytes()[1 + end] == b'}' => {
                let name = &tail[1..1 + end];
                match vars.var(name.trim()) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&tail[..end + 2]),
                }
                rest = &tail[end + 2..];
            }
            _ => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

// ============================================================================
// Contexts
// ============================================================================

/// Inputs to the artifact-generation prompt
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub form_values: FormValues,
    pub dataset_summary: String,
}

impl GenerationContext {
    /// Submitted value of a form field, empty when absent
    pub fn field(&self, id: &str) -> &str {
        self.form_values.get(id).map(String::as_str).unwrap_or("")
    }
}

impl TemplateVars for GenerationContext {
    fn var(&self, name: &str) -> Option<String> {
        match name {
            "dataset_summary" => Some(self.dataset_summary.clone()),
            _ => self.form_values.get(name).cloned(),
        }
    }
}

/// Inputs to the code-generation prompt for one artifact
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub artifact: Arc<Artifact>,
    pub dataset_summary: String,
}

impl TemplateVars for EvaluationContext {
    fn var(&self, name: &str) -> Option<String> {
        artifact_var(&self.artifact, name).or_else(|| match name {
            "dataset_summary" => Some(self.dataset_summary.clone()),
            _ => None,
        })
    }
}

/// Inputs to the interpretation prompt for one artifact
#[derive(Debug, Clone)]
pub struct InterpretationContext {
    pub artifact: Arc<Artifact>,
    pub dataset_summary: String,
    pub outcome: Outcome,
}

impl TemplateVars for InterpretationContext {
    fn var(&self, name: &str) -> Option<String> {
        if let Some(value) = artifact_var(&self.artifact, name) {
            return Some(value);
        }
        match name {
            "dataset_summary" => Some(self.dataset_summary.clone()),
            "success" => Some(self.outcome.success.to_string()),
            "score" => Some(self.outcome.score.to_string()),
            "label" => Some(self.outcome.label.clone()),
            "outcome" => Some(self.outcome.summary_line()),
            "result" => Some(self.outcome.payload.to_string()),
            _ => None,
        }
    }
}

/// Inputs to the synthesis prompt
#[derive(Debug, Clone, Default)]
pub struct SynthesisContext {
    pub tested: Vec<TestedArtifact>,
}

impl SynthesisContext {
    /// Blocks of `Title`/`Details`/`Result` lines, one per tested artifact
    pub fn listing(&self) -> String {
        self.tested
            .iter()
            .map(|t| {
                format!(
                    "Title: {}\nDetails: {}\nResult: {}",
                    t.artifact.title,
                    t.artifact.details,
                    t.outcome_text.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl TemplateVars for SynthesisContext {
    fn var(&self, name: &str) -> Option<String> {
        match name {
            "tested" => Some(self.listing()),
            "count" => Some(self.tested.len().to_string()),
            _ => None,
        }
    }
}

fn artifact_var(artifact: &Artifact, name: &str) -> Option<String> {
    match name {
        "title" => Some(artifact.title.clone()),
        "details" => Some(artifact.details.clone()),
        "artifact" => serde_json::to_string_pretty(&artifact.raw).ok(),
        _ => name
            .strip_prefix("artifact.")
            .and_then(|key| artifact.field(key)),
    }
}
