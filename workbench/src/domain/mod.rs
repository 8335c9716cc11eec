//! Analysis domains
//!
//! A [`DomainConfig`] parameterizes the whole pipeline for one kind of
//! analysis: the input form, the prompts for generation, code-writing,
//! interpretation and synthesis, the response schema, and how generated code
//! is invoked and its result normalized.
//!
//! - **prompt**: prompt sources and their contexts
//! - **registry**: validated, compiled domains by id
//! - **loader**: domains defined in YAML files
//! - **presets**: the built-in hypothesis, modeling and quality domains

pub mod loader;
pub mod presets;
pub mod prompt;
pub mod registry;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use workbench_sdk::FieldSchema;

use crate::artifact::{Artifact, ArtifactFields};
use crate::llm::ResponseFormat;
use crate::outcome::OutcomeShape;
use crate::sandbox::WorkerMode;

pub use prompt::{
    EvaluationContext, GenerationContext, InterpretationContext, PromptPair, PromptSource,
    SynthesisContext, TemplateVars,
};
pub use registry::{Domain, DomainRegistry};

/// Everything that varies between analysis domains
#[derive(Debug, Clone)]
pub struct DomainConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_fields: Vec<FieldSchema>,
    pub generation: GenerationSpec,
    pub response: ResponseConstraint,
    pub artifact_fields: ArtifactFields,
    pub evaluation: EvaluationSpec,
    pub execution: ExecutionSpec,
    /// Without it, outcomes are reported as a one-line summary
    pub interpretation: Option<PromptPair<InterpretationContext>>,
    pub synthesis: PromptPair<SynthesisContext>,
    /// Display name of the outcome score
    pub score_label: String,
}

/// Artifact-generation prompts
#[derive(Debug, Clone)]
pub struct GenerationSpec {
    pub system: PromptSource<GenerationContext>,
    /// Falls back to the dataset summary when absent
    pub user: Option<PromptSource<GenerationContext>>,
}

impl GenerationSpec {
    pub fn user_prompt(&self, ctx: &GenerationContext) -> String {
        match &self.user {
            Some(source) => source.resolve(ctx),
            None => ctx.dataset_summary.clone(),
        }
    }
}

/// Shape constraint on the generation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ResponseKind {
    JsonSchema { name: String, schema: Value },
    JsonObject,
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseConstraint {
    pub kind: ResponseKind,
    /// Key of the artifact array in the response document
    pub array_key: String,
}

impl ResponseConstraint {
    /// Object schema with a single required array property
    pub fn schema(name: impl Into<String>, array_key: impl Into<String>, item_schema: Value) -> Self {
        let array_key = array_key.into();
        let schema = json!({
            "type": "object",
            "properties": {
                array_key.as_str(): { "type": "array", "items": item_schema }
            },
            "required": [array_key.as_str()],
            "additionalProperties": false
        });
        Self {
            kind: ResponseKind::JsonSchema {
                name: name.into(),
                schema,
            },
            array_key,
        }
    }

    pub fn loose(array_key: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::JsonObject,
            array_key: array_key.into(),
        }
    }

    pub fn response_format(&self) -> Option<ResponseFormat> {
        match &self.kind {
            ResponseKind::JsonSchema { name, schema } => Some(ResponseFormat::JsonSchema {
                name: name.clone(),
                schema: schema.clone(),
                strict: true,
            }),
            ResponseKind::JsonObject => Some(ResponseFormat::JsonObject),
            ResponseKind::None => None,
        }
    }

    /// Schema of one artifact, when the response schema declares it
    pub fn item_schema(&self) -> Option<&Value> {
        match &self.kind {
            ResponseKind::JsonSchema { schema, .. } => {
                schema.get("properties")?.get(&self.array_key)?.get("items")
            }
            _ => None,
        }
    }
}

/// Code-generation prompts for one artifact
#[derive(Debug, Clone)]
pub struct EvaluationSpec {
    /// Default system prompt; the session may override it
    pub system: String,
    pub user: PromptSource<EvaluationContext>,
    /// Fence tag of the code block to extract
    pub language: String,
}

/// How generated code is invoked and its result read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSpec {
    /// Function the generated code must define
    pub entry_point: String,
    /// Pass the artifact as a second argument
    #[serde(default)]
    pub passes_artifact: bool,
    /// Global name the artifact is bound to when passed
    #[serde(default = "default_artifact_binding")]
    pub artifact_binding: String,
    #[serde(default)]
    pub outcome_shape: OutcomeShape,
    /// A successful run's `data` replaces the dataset
    #[serde(default)]
    pub replaces_dataset: bool,
    /// Worker mode override for this domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<WorkerMode>,
}

fn default_artifact_binding() -> String {
    "plan".to_string()
}

impl ExecutionSpec {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            passes_artifact: false,
            artifact_binding: default_artifact_binding(),
            outcome_shape: OutcomeShape::default(),
            replaces_dataset: false,
            isolation: None,
        }
    }

    /// Statement appended to the extracted code
    pub fn invocation(&self) -> String {
        if self.passes_artifact {
            format!(
                "{}(pd.DataFrame(data), {})",
                self.entry_point, self.artifact_binding
            )
        } else {
            format!("{}(pd.DataFrame(data))", self.entry_point)
        }
    }

    /// Generated code followed by the entry-point call
    pub fn program(&self, code: &str) -> String {
        format!("{}\n\n{}", code.trim_end(), self.invocation())
    }

    /// Sandbox globals for one artifact
    pub fn context(&self, artifact: &Artifact) -> Value {
        if self.passes_artifact {
            json!({ self.artifact_binding.as_str(): artifact.raw })
        } else {
            json!({})
        }
    }
}
