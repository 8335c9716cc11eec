//! Domains defined in YAML files
//!
//! Prompts are `{placeholder}` templates (see [`super::TemplateVars`]):
//!
//! ```yaml
//! id: outliers
//! name: Outlier review
//! input_fields:
//!   - id: analysis-context
//!     label: Analysis context
//!     kind: { type: text_area }
//!     required: true
//! generation:
//!   system: "You are a data analyst. Propose outlier checks."
//!   user: "{dataset_summary}\n\nContext:\n{analysis-context}"
//! response:
//!   format: json_schema
//!   name: checks
//!   schema: { ... }
//!   array_key: checks
//! evaluation:
//!   system: "Write python defining execute(df, plan) ..."
//!   user: "Check: {title}\n\n{dataset_summary}"
//! execution:
//!   entry_point: execute
//!   passes_artifact: true
//!   outcome_shape: row_transform
//! synthesis:
//!   system: "Summarize the checks."
//!   user: "{tested}"
//! score_label: rows removed
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use workbench_sdk::FieldSchema;

use super::{
    DomainConfig, EvaluationSpec, ExecutionSpec, GenerationSpec, PromptPair, PromptSource,
    ResponseConstraint, ResponseKind,
};
use crate::artifact::ArtifactFields;
use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DomainFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_fields: Vec<FieldSchema>,
    generation: GenerationFile,
    response: ResponseFile,
    #[serde(default)]
    artifact_fields: ArtifactFields,
    evaluation: EvaluationFile,
    execution: ExecutionSpec,
    #[serde(default)]
    interpretation: Option<PairFile>,
    synthesis: PairFile,
    #[serde(default = "default_score_label")]
    score_label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerationFile {
    system: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResponseFile {
    #[serde(default = "default_format")]
    format: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    schema: Option<Value>,
    array_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvaluationFile {
    system: String,
    user: String,
    #[serde(default = "default_language")]
    language: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PairFile {
    system: String,
    user: String,
}

fn default_score_label() -> String {
    "score".to_string()
}

fn default_format() -> String {
    "json_object".to_string()
}

fn default_language() -> String {
    "python".to_string()
}

/// Parse one domain definition
pub fn parse_domain(yaml: &str) -> Result<DomainConfig, ConfigError> {
    let file: DomainFile = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Invalid {
        domain: "<yaml>".to_string(),
        reason: e.to_string(),
    })?;
    file.into_config()
}

/// Parse every `*.yaml`/`*.yml` file in `dir`, in file-name order
pub fn load_dir(dir: &Path) -> Result<Vec<DomainConfig>, ConfigError> {
    let file_err = |path: &Path, reason: String| ConfigError::File {
        path: path.display().to_string(),
        reason,
    };

    let entries = std::fs::read_dir(dir).map_err(|e| file_err(dir, e.to_string()))?;
    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml" | "yml")
            )
        })
        .collect();
    paths.sort();

    let mut configs = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(&path).map_err(|e| file_err(&path, e.to_string()))?;
        let config = parse_domain(&text).map_err(|e| file_err(&path, e.to_string()))?;
        tracing::debug!(domain = %config.id, path = %path.display(), "loaded domain file");
        configs.push(config);
    }
    Ok(configs)
}

impl DomainFile {
    fn into_config(self) -> Result<DomainConfig, ConfigError> {
        let kind = match self.response.format.as_str() {
            "json_schema" => {
                let schema = self.response.schema.ok_or_else(|| ConfigError::Invalid {
                    domain: self.id.clone(),
                    reason: "response format json_schema needs a schema".to_string(),
                })?;
                ResponseKind::JsonSchema {
                    name: self
                        .response
                        .name
                        .unwrap_or_else(|| self.response.array_key.clone()),
                    schema,
                }
            }
            "json_object" => ResponseKind::JsonObject,
            "none" => ResponseKind::None,
            other => {
                return Err(ConfigError::Invalid {
                    domain: self.id,
                    reason: format!("unknown response format '{}'", other),
                })
            }
        };

        Ok(DomainConfig {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            input_fields: self.input_fields,
            generation: GenerationSpec {
                system: PromptSource::template(self.generation.system),
                user: self.generation.user.map(PromptSource::template),
            },
            response: ResponseConstraint {
                kind,
                array_key: self.response.array_key,
            },
            artifact_fields: self.artifact_fields,
            evaluation: EvaluationSpec {
                system: self.evaluation.system,
                user: PromptSource::template(self.evaluation.user),
                language: self.evaluation.language,
            },
            execution: self.execution,
            interpretation: self.interpretation.map(|pair| {
                PromptPair::new(
                    PromptSource::template(pair.system),
                    PromptSource::template(pair.user),
                )
            }),
            synthesis: PromptPair::new(
                PromptSource::template(self.synthesis.system),
                PromptSource::template(self.synthesis.user),
            ),
            score_label: self.score_label,
        })
    }
}
