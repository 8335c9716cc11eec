//! Common test utilities for workbench tests

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use workbench::dataset::parse_json_rows;
use workbench::domain::DomainRegistry;
use workbench::llm::{ReplayClient, ReplayRule};
use workbench::sandbox::{ExecutionBridge, ExecutionRequest, InlineReply, InlineWorkerFactory, Row};
use workbench::{Session, WorkbenchConfig};
use workbench_sdk::{FormValues, PipelineEvent};

/// System prompt fragments of the hypothesis domain, one per LLM call kind
pub const HYPOTHESIS_GENERATION: &str = "propose 5-10 hypotheses";
pub const HYPOTHESIS_EVALUATION: &str = "Test the given hypothesis";
pub const HYPOTHESIS_INTERPRETATION: &str = "Given a hypothesis and its outcome";
pub const HYPOTHESIS_SYNTHESIS: &str = "Given the below hypotheses and results";

/// Session wired to a replay client and inline sandbox workers
pub struct Harness {
    pub session: Session,
    pub client: Arc<ReplayClient>,
    pub workers: Arc<InlineWorkerFactory>,
}

pub fn config(domain: &str) -> WorkbenchConfig {
    WorkbenchConfig {
        default_domain: domain.to_string(),
        sandbox_timeout: Duration::from_secs(5),
        ..WorkbenchConfig::default()
    }
}

pub fn harness<F>(domain: &str, rules: Vec<ReplayRule>, handler: F) -> Harness
where
    F: Fn(&ExecutionRequest) -> Option<InlineReply> + Send + Sync + 'static,
{
    harness_with(
        DomainRegistry::with_defaults().unwrap(),
        config(domain),
        rules,
        handler,
    )
}

pub fn harness_with<F>(
    registry: DomainRegistry,
    config: WorkbenchConfig,
    rules: Vec<ReplayRule>,
    handler: F,
) -> Harness
where
    F: Fn(&ExecutionRequest) -> Option<InlineReply> + Send + Sync + 'static,
{
    let client = Arc::new(ReplayClient::new(rules));
    let workers = Arc::new(InlineWorkerFactory::new(handler));
    let bridge = Arc::new(ExecutionBridge::new(workers.clone()).with_timeout(config.sandbox_timeout));
    let session = Session::new(Arc::new(registry), client.clone(), bridge, config).unwrap();

    Harness {
        session,
        client,
        workers,
    }
}

pub fn rows(value: Value) -> Vec<Row> {
    parse_json_rows(&value.to_string()).unwrap()
}

/// The two-row churn dataset
pub fn churn_rows() -> Vec<Row> {
    rows(json!([
        {"age": 25, "churn": "yes"},
        {"age": 40, "churn": "no"}
    ]))
}

pub fn form(values: &[(&str, &str)]) -> FormValues {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn hypothesis_form() -> FormValues {
    form(&[
        ("analysis-context", "Reduce churn among subscribers"),
        ("audience", "Retention marketing team"),
    ])
}

/// Generation reply listing the given hypotheses
pub fn hypotheses_reply(titles: &[&str]) -> String {
    let items: Vec<Value> = titles
        .iter()
        .map(|title| json!({"hypothesis": title, "benefit": format!("Act on: {}", title)}))
        .collect();
    json!({ "hypotheses": items }).to_string()
}

/// Code-generation reply with commentary around one python block
pub fn code_reply(body: &str) -> String {
    format!(
        "Here is the test.\n\n```python\nimport pandas as pd\n\n{}\n```\n\nThe function returns the result.",
        body
    )
}

pub const PASSING_TEST: &str = "def test_hypothesis(df):\n    return (True, 0.01)";
pub const RAISING_TEST: &str = "def test_hypothesis(df):\n    raise ValueError(\"boom\")";

/// Inline stand-in for the python worker running hypothesis tests
pub fn hypothesis_worker(request: &ExecutionRequest) -> Option<InlineReply> {
    if request.code.contains("raise ValueError") {
        Some(InlineReply::error("ValueError: boom"))
    } else if request.code.contains("return (True, 0.01)") {
        Some(InlineReply::ok(json!([true, 0.01])))
    } else {
        Some(InlineReply::error("NameError: name 'test_hypothesis' is not defined"))
    }
}

/// Events received so far, without waiting
pub fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
