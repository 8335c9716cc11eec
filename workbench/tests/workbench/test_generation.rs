//! Artifact generation through the session

use super::common::*;
use workbench::llm::{ReplayRule, ResponseFormat};
use workbench::WorkbenchError;
use workbench_sdk::PipelineEvent;

#[tokio::test]
async fn test_hypothesis_generation_streams_artifacts() {
    let reply = hypotheses_reply(&[
        "Younger customers churn more",
        "Older customers stay longer",
    ]);
    let h = harness(
        "hypothesis",
        vec![ReplayRule::reply(reply).when_system(HYPOTHESIS_GENERATION).chunked(7)],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    let mut rx = h.session.subscribe();

    let artifacts = h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    assert_eq!(artifacts.len(), 2);
    for artifact in &artifacts {
        assert!(!artifact.title.is_empty());
        assert!(!artifact.details.is_empty());
        assert!(artifact.raw["hypothesis"].is_string());
        assert!(artifact.raw["benefit"].is_string());
    }
    assert_eq!(artifacts[0].title, "Younger customers churn more");

    // The list only ever grows by complete elements
    let sizes: Vec<usize> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::ArtifactsUpdated { artifacts } => Some(artifacts.len()),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![0, 1, 2]);

    let requests = h.client.requests();
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        requests[0].response_format,
        Some(ResponseFormat::JsonSchema { ref name, .. }) if name == "hypotheses"
    ));
    let user = requests[0].user_prompt().unwrap();
    assert!(user.starts_with("The Pandas DataFrame df has 2 rows and 2 columns:"));
    assert!(user.ends_with("Context:\nReduce churn among subscribers"));
    assert!(requests[0]
        .system_prompt()
        .unwrap()
        .contains("The audience is: Retention marketing team"));

    assert_eq!(h.session.cards().await.len(), 2);
}

#[tokio::test]
async fn test_blank_required_field_never_reaches_client() {
    let h = harness(
        "hypothesis",
        vec![ReplayRule::reply(hypotheses_reply(&["unused"]))],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    let mut rx = h.session.subscribe();

    let result = h
        .session
        .generate_artifacts(&form(&[("analysis-context", ""), ("audience", "Ops")]))
        .await;

    match result {
        Err(WorkbenchError::Validation { missing }) => {
            assert_eq!(missing, vec!["Analysis context".to_string()])
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(h.client.call_count(), 0);
    assert!(drain(&mut rx)
        .iter()
        .any(|event| matches!(event, PipelineEvent::GenerationFailed { .. })));
}

#[tokio::test]
async fn test_validation_precedes_dataset_check() {
    let h = harness("hypothesis", Vec::new(), hypothesis_worker);

    let result = h.session.generate_artifacts(&form(&[])).await;

    assert!(matches!(result, Err(WorkbenchError::Validation { .. })));
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn test_generation_without_dataset() {
    let h = harness("hypothesis", Vec::new(), hypothesis_worker);

    let result = h.session.generate_artifacts(&hypothesis_form()).await;

    assert!(matches!(result, Err(WorkbenchError::NoDataset)));
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn test_reply_without_artifact_array_fails() {
    let h = harness(
        "hypothesis",
        vec![ReplayRule::reply("I'm sorry, I can't propose hypotheses for this data.")],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;

    let result = h.session.generate_artifacts(&hypothesis_form()).await;

    assert!(matches!(result, Err(WorkbenchError::Generation(_))));
    assert!(h.session.cards().await.is_empty());
}

#[tokio::test]
async fn test_transport_failure_is_generation_error() {
    let h = harness(
        "hypothesis",
        vec![ReplayRule::reply(r#"{"hypotheses":[{"hypothesis":"A","#).failing("connection reset")],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;

    let result = h.session.generate_artifacts(&hypothesis_form()).await;

    assert!(matches!(result, Err(WorkbenchError::Generation(ref msg)) if msg.contains("connection reset")));
    assert!(h.session.cards().await.is_empty());
}

#[tokio::test]
async fn test_regeneration_replaces_artifacts() {
    let h = harness(
        "hypothesis",
        vec![
            ReplayRule::reply(hypotheses_reply(&["Second list only"])).when_user("second run"),
            ReplayRule::reply(hypotheses_reply(&["First A", "First B"])),
        ],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;

    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    assert_eq!(h.session.cards().await.len(), 2);

    let second = h
        .session
        .generate_artifacts(&form(&[("analysis-context", "second run")]))
        .await
        .unwrap();
    assert_eq!(second.len(), 1);

    let titles: Vec<String> = h
        .session
        .artifacts()
        .await
        .iter()
        .map(|a| a.title.clone())
        .collect();
    assert_eq!(titles, vec!["Second list only".to_string()]);
}

#[tokio::test]
async fn test_domain_switch_discards_artifacts() {
    let h = harness(
        "hypothesis",
        vec![ReplayRule::reply(hypotheses_reply(&["A", "B"]))],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    h.session.set_domain("modeling").await.unwrap();

    assert!(h.session.cards().await.is_empty());
    assert_eq!(h.session.domain().await.id, "modeling");
    assert!(matches!(
        h.session.set_domain("forecasting").await,
        Err(WorkbenchError::UnknownDomain(_))
    ));
    assert_eq!(h.session.domain().await.id, "modeling");
}
