//! Normalized execution outcomes
//!
//! Each domain's entry point returns its own raw shape. [`normalize_outcome`]
//! turns that value into an [`Outcome`] according to the domain's
//! [`OutcomeShape`]:
//!
//! | shape | raw value | success | score |
//! |---|---|---|---|
//! | `success_score` | `[bool, number]` | first element | second element |
//! | `model_metric` | `{"score": n, "success"?: b}` or `[b, n]` | `success`, default true | `score` |
//! | `row_transform` | `{"rows_before": n, "rows_after": m, "data"?: [...]}` | `m <= n` | `n - m` |
//!
//! Any other value fails the outcome with its JSON text as the score.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

use crate::dataset::format_number;
use crate::sandbox::Row;

/// How a domain's entry point reports its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeShape {
    #[default]
    SuccessScore,
    ModelMetric,
    RowTransform,
}

/// Headline metric of an outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Number(Number),
    Text(String),
}

impl Score {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Score::Number(n) => n.as_f64(),
            Score::Text(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Score::Number(n) => Value::Number(n.clone()),
            Score::Text(s) => Value::String(s.clone()),
        }
    }

    fn count(n: u64) -> Self {
        Score::Number(Number::from(n))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Number(n) => match n.as_f64() {
                Some(value) => f.write_str(&format_number(value)),
                None => write!(f, "{}", n),
            },
            Score::Text(s) => f.write_str(s),
        }
    }
}

/// Result of one artifact test, normalized across domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub score: Score,
    /// Display name of the score (`p-value`, `accuracy`, ...)
    pub label: String,
    /// Raw value returned by the sandbox
    pub payload: Value,
}

impl Outcome {
    /// One-line summary used when a domain has no interpretation prompt
    pub fn summary_line(&self) -> String {
        format!(
            "{} ({}={})",
            if self.success { "Pass" } else { "Fail" },
            self.label,
            self.score
        )
    }

    /// Cleaned rows carried by a `row_transform` payload
    pub fn replacement_rows(&self) -> Option<Vec<Row>> {
        let rows = self.payload.get("data")?.as_array()?;
        rows.iter()
            .map(|row| row.as_object().cloned())
            .collect::<Option<Vec<Row>>>()
    }
}

/// Convert a raw sandbox result into an [`Outcome`]
pub fn normalize_outcome(shape: OutcomeShape, raw: Value, label: &str) -> Outcome {
    let (success, score) = match shape {
        OutcomeShape::SuccessScore => success_score(&raw),
        OutcomeShape::ModelMetric => model_metric(&raw),
        OutcomeShape::RowTransform => row_transform(&raw),
    }
    .unwrap_or_else(|| (false, Score::Text(value_text(&raw))));

    Outcome {
        success,
        score,
        label: label.to_string(),
        payload: raw,
    }
}

fn success_score(raw: &Value) -> Option<(bool, Score)> {
    let items = raw.as_array()?;
    let success = items.first()?.as_bool()?;
    let score = match items.get(1)? {
        Value::Number(n) => Score::Number(n.clone()),
        // NaN arrives as null
        Value::Null => Score::Text("nan".to_string()),
        _ => return None,
    };
    Some((success, score))
}

fn model_metric(raw: &Value) -> Option<(bool, Score)> {
    match raw {
        Value::Object(map) => {
            let score = match map.get("score")? {
                Value::Number(n) => Score::Number(n.clone()),
                Value::String(s) => Score::Text(s.clone()),
                _ => return None,
            };
            let success = match map.get("success") {
                None | Some(Value::Null) => true,
                Some(value) => value.as_bool()?,
            };
            Some((success, score))
        }
        Value::Array(_) => success_score(raw),
        _ => None,
    }
}

fn row_transform(raw: &Value) -> Option<(bool, Score)> {
    let before = raw.get("rows_before")?.as_u64()?;
    let after = raw.get("rows_after")?.as_u64()?;
    Some((after <= before, Score::count(before.saturating_sub(after))))
}

fn value_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
