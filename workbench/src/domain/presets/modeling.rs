use serde_json::json;
use workbench_sdk::{FieldKind, FieldSchema};

use crate::artifact::ArtifactFields;
use crate::domain::{
    DomainConfig, EvaluationContext, EvaluationSpec, ExecutionSpec, GenerationContext,
    GenerationSpec, InterpretationContext, PromptPair, PromptSource, ResponseConstraint,
    SynthesisContext,
};
use crate::outcome::OutcomeShape;

const GENERATION_PROMPT: &str = "You are an expert data scientist. Given a description of a Pandas DataFrame and a modeling goal, propose 3-6 modeling experiments.

Each experiment states its objective, the target column, and the feature columns it uses. Prefer simple, robust, explainable baselines before complex models.";

const EVALUATION_PROMPT: &str = r#"You are an expert data scientist. Implement the given modeling experiment on the provided Pandas DataFrame (df).

1. Use only the target and features named in the plan, deriving columns ONLY IF REQUIRED.
2. Prefer simple, robust baselines (linear/logistic regression, decision trees) from scikit-learn.
3. Hold out a test split and report one headline metric on it (accuracy or ROC AUC for classification, R^2 for regression).
4. Set success to False if the model does not beat a trivial baseline.

Write the code as follows:

```python
import pandas as pd

def run_experiment(df, plan) -> dict:
    # plan is the experiment as a dict: objective, target, features
    return {"score": metric, "success": beats_baseline, "model": model_name, "metric": metric_name}
```
"#;

const INTERPRETATION_PROMPT: &str = "You are an expert data scientist. Summarize the model outcome with a crisp H5 heading and 1-2 supporting sentences highlighting trade-offs and key drivers in **bold**. Avoid raw metric values; interpret them instead.";

const SYNTHESIS_PROMPT: &str = "Summarize model proposals and outcomes as actionable recommendations (H5 titles), with bullet points citing which proposals support each action. Ignore results with errors.";

/// Modeling experiments: `run_experiment(df, plan) -> {"score": ..}`
pub fn modeling() -> DomainConfig {
    DomainConfig {
        id: "modeling".to_string(),
        name: "Modeling experiments".to_string(),
        description: "Propose predictive modeling experiments and run baseline models".to_string(),
        input_fields: vec![
            FieldSchema::new("goal", "Modeling goal", FieldKind::TextArea)
                .required()
                .placeholder("What should the model predict, and for whom?"),
            FieldSchema::new("target", "Target column", FieldKind::Text)
                .placeholder("Leave blank to let the model choose"),
        ],
        generation: GenerationSpec {
            system: PromptSource::fixed(GENERATION_PROMPT),
            user: Some(PromptSource::templated(|ctx: &GenerationContext| {
                let mut prompt = format!("{}\n\nGoal:\n{}", ctx.dataset_summary, ctx.field("goal"));
                let target = ctx.field("target").trim();
                if !target.is_empty() {
                    prompt.push_str(&format!("\n\nTarget column: {}", target));
                }
                prompt
            })),
        },
        response: ResponseConstraint::schema(
            "models",
            "models",
            json!({
                "type": "object",
                "properties": {
                    "objective": { "type": "string" },
                    "target": { "type": "string" },
                    "features": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["objective", "target"],
                "additionalProperties": true
            }),
        ),
        artifact_fields: ArtifactFields::new("objective", "target"),
        evaluation: EvaluationSpec {
            system: EVALUATION_PROMPT.to_string(),
            user: PromptSource::templated(|ctx: &EvaluationContext| {
                let features = ctx.artifact.field("features").unwrap_or_default();
                format!(
                    "Experiment: {}\nTarget: {}\nFeatures: {}\n\n{}",
                    ctx.artifact.title, ctx.artifact.details, features, ctx.dataset_summary
                )
            }),
            language: "python".to_string(),
        },
        execution: ExecutionSpec {
            passes_artifact: true,
            outcome_shape: OutcomeShape::ModelMetric,
            ..ExecutionSpec::new("run_experiment")
        },
        interpretation: Some(PromptPair::new(
            PromptSource::fixed(INTERPRETATION_PROMPT),
            PromptSource::templated(|ctx: &InterpretationContext| {
                format!(
                    "Experiment: {}\nTarget: {}\n\n{}\n\nResult: {}\nDetails: {}",
                    ctx.artifact.title,
                    ctx.artifact.details,
                    ctx.dataset_summary,
                    ctx.outcome.summary_line(),
                    ctx.outcome.payload
                )
            }),
        )),
        synthesis: PromptPair::new(
            PromptSource::fixed(SYNTHESIS_PROMPT),
            PromptSource::templated(|ctx: &SynthesisContext| {
                ctx.tested
                    .iter()
                    .map(|t| {
                        format!(
                            "Experiment: {}\nTarget: {}\nResult: {}",
                            t.artifact.title,
                            t.artifact.details,
                            t.outcome_text.trim()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }),
        ),
        score_label: "score".to_string(),
    }
}
