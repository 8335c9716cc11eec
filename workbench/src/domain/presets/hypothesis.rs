use serde_json::json;
use workbench_sdk::{FieldKind, FieldSchema};

use crate::artifact::ArtifactFields;
use crate::dataset::format_number;
use crate::domain::{
    DomainConfig, EvaluationContext, EvaluationSpec, ExecutionSpec, GenerationContext,
    GenerationSpec, InterpretationContext, PromptPair, PromptSource, ResponseConstraint,
    SynthesisContext,
};
use crate::outcome::{OutcomeShape, Score};

const GENERATION_PROMPT: &str = "You are an expert data analyst. Given a description of a Pandas DataFrame and the business context, propose 5-10 hypotheses that can be tested on this data.

Each hypothesis must be a specific, falsifiable claim about relationships in the data. Pair it with the benefit: the concrete action the audience could take if the hypothesis holds.
Prefer hypotheses that are surprising and actionable over obvious ones.";

const EVALUATION_PROMPT: &str = r#"You are an expert data analyst. Test the given hypothesis on the provided Pandas DataFrame (df) as follows:

1. Create derived columns ONLY IF REQUIRED. E.g. If "CurrentMedication" contains "insulin", classify it as "Injectable", otherwise as "Pill".
2. If that's not possible, provide the best possible answer based on available data to the hypothesis, making assumptions.
3. Use the appropriate hypothesis test, e.g. t-test, chi-square, correlation significance test, etc.
4. Return the results as (success: bool, p_value: float)

Write the code as follows:

```python
import pandas as pd
import scipy.stats as stats

def test_hypothesis(df) -> (bool, float):
    # use the imported modules to test the hypothesis
    return result, p_value
```
"#;

const INTERPRETATION_PROMPT: &str = "You are an expert data analyst.
Given a hypothesis and its outcome, provide a plain English summary of the findings as a crisp H5 heading (#####), followed by 1-2 concise supporting sentences.
Highlight in **bold** the keywords in the supporting statements.
Do not mention the p-value but _interpret_ it to support the conclusion quantitatively.";

const SYNTHESIS_PROMPT: &str = "Given the below hypotheses and results, summarize the key takeaways and actions in Markdown.
Begin with the hypotheses with lowest p-values AND highest business impact. Ignore results with errors.
Use action titles has H5 (#####). Just reading titles should tell the audience EXACTLY what to do.
Below each, add supporting bullet points that
  - PROVE the action title, mentioning which hypotheses led to this conclusion.
  - Do not mention the p-value but _interpret_ it to support the action
  - Highlight key phrases in **bold**.
Finally, after a break (---) add a 1-paragraph executive summary section (H5) summarizing these actions.
";

/// Statistical hypothesis testing: `test_hypothesis(df) -> (bool, p_value)`
pub fn hypothesis() -> DomainConfig {
    DomainConfig {
        id: "hypothesis".to_string(),
        name: "Hypothesis testing".to_string(),
        description: "Propose hypotheses about the data and test each with a statistical test"
            .to_string(),
        input_fields: vec![
            FieldSchema::new("audience", "Audience", FieldKind::TextArea)
                .placeholder("Who will act on the findings, e.g. a retention marketing team"),
            FieldSchema::new("analysis-context", "Analysis context", FieldKind::TextArea)
                .required()
                .placeholder("What decision should this analysis inform?"),
        ],
        generation: GenerationSpec {
            system: PromptSource::templated(|ctx: &GenerationContext| {
                let audience = ctx.field("audience").trim();
                if audience.is_empty() {
                    GENERATION_PROMPT.to_string()
                } else {
                    format!("{}\n\nThe audience is: {}", GENERATION_PROMPT, audience)
                }
            }),
            user: Some(PromptSource::templated(|ctx: &GenerationContext| {
                format!(
                    "{}\n\nContext:\n{}",
                    ctx.dataset_summary,
                    ctx.field("analysis-context")
                )
            })),
        },
        response: ResponseConstraint::schema(
            "hypotheses",
            "hypotheses",
            json!({
                "type": "object",
                "properties": {
                    "hypothesis": { "type": "string" },
                    "benefit": { "type": "string" }
                },
                "required": ["hypothesis", "benefit"],
                "additionalProperties": false
            }),
        ),
        artifact_fields: ArtifactFields::new("hypothesis", "benefit"),
        evaluation: EvaluationSpec {
            system: EVALUATION_PROMPT.to_string(),
            user: PromptSource::templated(|ctx: &EvaluationContext| {
                format!("Hypothesis: {}\n\n{}", ctx.artifact.title, ctx.dataset_summary)
            }),
            language: "python".to_string(),
        },
        execution: ExecutionSpec {
            outcome_shape: OutcomeShape::SuccessScore,
            ..ExecutionSpec::new("test_hypothesis")
        },
        interpretation: Some(PromptPair::new(
            PromptSource::fixed(INTERPRETATION_PROMPT),
            PromptSource::templated(|ctx: &InterpretationContext| {
                let score = match &ctx.outcome.score {
                    Score::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
                    Score::Text(text) => text.clone(),
                };
                format!(
                    "Hypothesis: {}\n\n{}\n\nResult: {}. p-value: {}",
                    ctx.artifact.title, ctx.dataset_summary, ctx.outcome.success, score
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
                            "Hypothesis: {}\nBenefit: {}\nResult: {}",
                            t.artifact.title,
                            t.artifact.details,
                            t.outcome_text.trim()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }),
        ),
        score_label: "p-value".to_string(),
    }
}
