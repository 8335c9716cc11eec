use serde_json::json;
use workbench_sdk::{FieldKind, FieldSchema};

use crate::artifact::ArtifactFields;
use crate::domain::{
    DomainConfig, EvaluationContext, EvaluationSpec, ExecutionSpec, GenerationContext,
    GenerationSpec, PromptPair, PromptSource, ResponseConstraint,
};
use crate::outcome::OutcomeShape;
use crate::sandbox::WorkerMode;

const GENERATION_PROMPT: &str = "You are a meticulous data engineer. Given a description of a Pandas DataFrame, propose 3-8 data quality checks that each clean one concrete problem: duplicate rows, missing values, inconsistent categories, impossible values, bad types.

Each check has a short title and details describing exactly which rows or columns it changes and how.";

const EVALUATION_PROMPT: &str = r#"You are a meticulous data engineer. Implement the given data quality check on the provided Pandas DataFrame (df).

1. Never modify df in place; work on a copy.
2. Only remove or fix rows; never add rows.
3. Return the row count before and after, and the cleaned rows.

Write the code as follows:

```python
import pandas as pd

def execute(df, plan) -> dict:
    # plan is the check as a dict: title, details
    cleaned = df.copy()
    return {"rows_before": len(df), "rows_after": len(cleaned), "data": cleaned}
```
"#;

const SYNTHESIS_PROMPT: &str = "Given the below data quality checks and their results, summarize in Markdown what was cleaned and what data issues remain.
Use H5 (#####) titles per issue, with bullet points citing the checks involved. Ignore results with errors.";

/// Data-quality checks that clean the dataset: `execute(df, plan) -> {rows_before, rows_after, data}`
pub fn quality() -> DomainConfig {
    DomainConfig {
        id: "quality".to_string(),
        name: "Data quality".to_string(),
        description: "Propose cleaning steps and apply each to a fresh copy of the data"
            .to_string(),
        input_fields: vec![FieldSchema::new("focus", "Known issues", FieldKind::TextArea)
            .placeholder("Optional: problems you already suspect")],
        generation: GenerationSpec {
            system: PromptSource::fixed(GENERATION_PROMPT),
            user: Some(PromptSource::templated(|ctx: &GenerationContext| {
                let focus = ctx.field("focus").trim();
                if focus.is_empty() {
                    ctx.dataset_summary.clone()
                } else {
                    format!("{}\n\nKnown issues:\n{}", ctx.dataset_summary, focus)
                }
            })),
        },
        response: ResponseConstraint::schema(
            "checks",
            "checks",
            json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "details": { "type": "string" }
                },
                "required": ["title", "details"],
                "additionalProperties": false
            }),
        ),
        artifact_fields: ArtifactFields::new("title", "details"),
        evaluation: EvaluationSpec {
            system: EVALUATION_PROMPT.to_string(),
            user: PromptSource::templated(|ctx: &EvaluationContext| {
                format!(
                    "Check: {}\nDetails: {}\n\n{}",
                    ctx.artifact.title, ctx.artifact.details, ctx.dataset_summary
                )
            }),
            language: "python".to_string(),
        },
        execution: ExecutionSpec {
            passes_artifact: true,
            outcome_shape: OutcomeShape::RowTransform,
            replaces_dataset: true,
            // Each cleaning starts from a fresh interpreter
            isolation: Some(WorkerMode::Ephemeral),
            ..ExecutionSpec::new("execute")
        },
        interpretation: None,
        synthesis: PromptPair::new(
            PromptSource::fixed(SYNTHESIS_PROMPT),
            PromptSource::template("{tested}"),
        ),
        score_label: "rows removed".to_string(),
    }
}
