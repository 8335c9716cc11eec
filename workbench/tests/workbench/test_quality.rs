//! Data-quality runs replace the dataset snapshot and can be undone

use super::common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use workbench::llm::ReplayRule;
use workbench::sandbox::{ExecutionRequest, InlineReply};
use workbench_sdk::{PipelineEvent, PipelineState};

const QUALITY_GENERATION: &str = "propose 3-8 data quality checks";
const QUALITY_EVALUATION: &str = "Implement the given data quality check";

const DEDUP_CODE: &str = "def execute(df, plan):\n    cleaned = df.drop_duplicates()\n    return {\"rows_before\": len(df), \"rows_after\": len(cleaned), \"data\": cleaned}";

fn quality_rules() -> Vec<ReplayRule> {
    vec![
        ReplayRule::reply(
            json!({"checks": [
                {"title": "Deduplicate rows", "details": "Drop rows that repeat every column"},
                {"title": "Drop everything", "details": "Remove all rows"}
            ]})
            .to_string(),
        )
        .when_system(QUALITY_GENERATION),
        ReplayRule::reply(code_reply(DEDUP_CODE)).when_system(QUALITY_EVALUATION),
    ]
}

/// Stands in for pandas: deduplicates the submitted rows
fn dedup_worker(request: &ExecutionRequest) -> Option<InlineReply> {
    if !request.code.ends_with("execute(pd.DataFrame(data), plan)") {
        return Some(InlineReply::error("NameError: name 'plan' is not defined"));
    }
    match request.context["plan"]["title"].as_str() {
        Some("Deduplicate rows") => {}
        Some(_) => return Some(InlineReply::error("KeyError: 'id'")),
        None => return Some(InlineReply::error("NameError: name 'plan' is not defined")),
    }

    let mut unique: Vec<Value> = Vec::new();
    for row in request.data.iter() {
        let row = Value::Object(row.clone());
        if !unique.contains(&row) {
            unique.push(row);
        }
    }
    Some(InlineReply::ok(json!({
        "rows_before": request.data.len(),
        "rows_after": unique.len(),
        "data": unique,
    })))
}

#[tokio::test]
async fn test_cleaning_run_snapshots_and_undo_restores() {
    let h = harness("quality", quality_rules(), dedup_worker);
    let original = h
        .session
        .load_dataset(rows(json!([{"id": 1}, {"id": 1}, {"id": 2}])))
        .await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();
    let mut rx = h.session.subscribe();

    let outcome = h.session.test_artifact(0).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.score.as_f64(), Some(1.0));
    assert_eq!(outcome.payload["rows_after"], json!(2));

    let cleaned = h.session.dataset().await.unwrap();
    assert_eq!(*cleaned, rows(json!([{"id": 1}, {"id": 2}])));
    assert!(cleaned.len() <= original.len());
    assert_eq!(h.session.undo_depth().await, 1);
    assert!(h
        .session
        .dataset_summary()
        .await
        .unwrap()
        .starts_with("The Pandas DataFrame df has 2 rows"));

    // No interpretation prompt: the outcome is a one-line summary
    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Done);
    assert_eq!(card.outcome_text, "Pass (rows removed=1)");

    assert!(drain(&mut rx).iter().any(|event| matches!(
        event,
        PipelineEvent::DatasetReplaced {
            rows_before: 3,
            rows_after: 2,
            undo_depth: 1
        }
    )));

    let restored = h.session.undo_dataset().await.unwrap();
    assert!(Arc::ptr_eq(&restored, &original));
    assert_eq!(*restored, rows(json!([{"id": 1}, {"id": 1}, {"id": 2}])));
    assert_eq!(h.session.undo_depth().await, 0);
    assert!(h.session.undo_dataset().await.is_none());
}

#[tokio::test]
async fn test_failed_cleaning_keeps_dataset() {
    let h = harness("quality", quality_rules(), dedup_worker);
    let original = h
        .session
        .load_dataset(rows(json!([{"id": 1}, {"id": 1}, {"id": 2}])))
        .await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();

    let result = h.session.test_artifact(1).await;

    assert!(result.is_err());
    assert!(Arc::ptr_eq(&h.session.dataset().await.unwrap(), &original));
    assert_eq!(h.session.undo_depth().await, 0);
    assert_eq!(h.session.cards().await[1].outcome_text, "KeyError: 'id'");
}

#[tokio::test]
async fn test_cleaning_runs_in_fresh_workers() {
    let h = harness("quality", quality_rules(), dedup_worker);
    h.session
        .load_dataset(rows(json!([{"id": 1}, {"id": 1}, {"id": 2}])))
        .await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();

    h.session.run_all().await;

    assert_eq!(h.workers.spawned(), 2);
    assert_eq!(h.workers.terminated(), 2);
}

#[tokio::test]
async fn test_reload_clears_undo_history() {
    let h = harness("quality", quality_rules(), dedup_worker);
    h.session
        .load_dataset(rows(json!([{"id": 1}, {"id": 1}])))
        .await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();
    h.session.test_artifact(0).await.unwrap();
    assert_eq!(h.session.undo_depth().await, 1);

    h.session.load_dataset(rows(json!([{"id": 3}]))).await;

    assert_eq!(h.session.undo_depth().await, 0);
    assert!(h.session.cards().await.is_empty());
}

/// Dedup answers quickly, dropping `id == 2` answers slowly
fn concurrent_cleaning_worker(request: &ExecutionRequest) -> Option<InlineReply> {
    let rows: Vec<Value> = request.data.iter().map(|row| Value::Object(row.clone())).collect();
    let (kept, delay) = match request.context["plan"]["title"].as_str() {
        Some("Deduplicate rows") => {
            let mut unique: Vec<Value> = Vec::new();
            for row in rows.iter() {
                if !unique.contains(row) {
                    unique.push(row.clone());
                }
            }
            (unique, Duration::from_millis(10))
        }
        Some("Drop id 2") => (
            rows.iter().filter(|row| row["id"] != json!(2)).cloned().collect(),
            Duration::from_millis(60),
        ),
        _ => return Some(InlineReply::error("KeyError: 'id'")),
    };
    Some(
        InlineReply::ok(json!({
            "rows_before": rows.len(),
            "rows_after": kept.len(),
            "data": kept,
        }))
        .after(delay),
    )
}

#[tokio::test]
async fn test_run_all_applies_every_cleaning() {
    let h = harness(
        "quality",
        vec![
            ReplayRule::reply(
                json!({"checks": [
                    {"title": "Deduplicate rows", "details": "Drop rows that repeat every column"},
                    {"title": "Drop id 2", "details": "Remove rows whose id is 2"}
                ]})
                .to_string(),
            )
            .when_system(QUALITY_GENERATION),
            ReplayRule::reply(code_reply(DEDUP_CODE)).when_system(QUALITY_EVALUATION),
        ],
        concurrent_cleaning_worker,
    );
    let original = h
        .session
        .load_dataset(rows(json!([{"id": 1}, {"id": 1}, {"id": 2}])))
        .await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();

    let results = h.session.run_all().await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(*h.session.dataset().await.unwrap(), rows(json!([{"id": 1}])));
    assert_eq!(h.session.undo_depth().await, 2);

    // Each undo step restores a snapshot that was current at some point
    let intermediate = h.session.undo_dataset().await.unwrap();
    assert!(intermediate.len() == 2);
    assert!(!Arc::ptr_eq(&intermediate, &original));
    let restored = h.session.undo_dataset().await.unwrap();
    assert!(Arc::ptr_eq(&restored, &original));
}
