//! Synthesis over tested artifacts

use super::common::*;
use workbench::llm::ReplayRule;
use workbench::WorkbenchError;
use workbench_sdk::PipelineEvent;

const INTERPRETATION: &str = "##### Younger customers churn more";
const SYNTHESIS: &str = "##### Target retention offers at customers under 30\n- Supported by the age hypothesis.";

fn rules() -> Vec<ReplayRule> {
    vec![
        ReplayRule::reply(hypotheses_reply(&[
            "Younger customers churn more",
            "Plan type drives churn",
            "Support calls predict churn",
        ]))
        .when_system(HYPOTHESIS_GENERATION),
        ReplayRule::reply(code_reply(RAISING_TEST))
            .when_system(HYPOTHESIS_EVALUATION)
            .when_user("Hypothesis: Plan type drives churn"),
        ReplayRule::reply(code_reply(PASSING_TEST)).when_system(HYPOTHESIS_EVALUATION),
        ReplayRule::reply(INTERPRETATION).when_system(HYPOTHESIS_INTERPRETATION),
        ReplayRule::reply(SYNTHESIS).when_system(HYPOTHESIS_SYNTHESIS).chunked(10),
    ]
}

#[tokio::test]
async fn test_nothing_tested_fails_before_network() {
    let h = harness("hypothesis", rules(), hypothesis_worker);
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    let calls = h.client.call_count();
    let mut rx = h.session.subscribe();

    let result = h.session.synthesize().await;

    assert!(matches!(result, Err(WorkbenchError::NothingToSynthesize)));
    assert_eq!(h.client.call_count(), calls);
    assert!(drain(&mut rx)
        .iter()
        .any(|event| matches!(event, PipelineEvent::SynthesisFailed { .. })));
}

#[tokio::test]
async fn test_synthesis_covers_tested_artifacts() {
    let h = harness("hypothesis", rules(), hypothesis_worker);
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    h.session.test_artifact(0).await.unwrap();
    assert!(h.session.test_artifact(1).await.is_err());
    let mut rx = h.session.subscribe();

    let text = h.session.synthesize().await.unwrap();

    assert_eq!(text, SYNTHESIS);
    assert_eq!(h.session.synthesis().await.as_deref(), Some(SYNTHESIS));

    let request = h.client.requests().pop().unwrap();
    let user = request.user_prompt().unwrap();
    assert!(user.contains(&format!(
        "Hypothesis: Younger customers churn more\nBenefit: Act on: Younger customers churn more\nResult: {}",
        INTERPRETATION
    )));
    assert!(user.contains("Hypothesis: Plan type drives churn"));
    assert!(user.contains("Result: ValueError: boom"));
    // Artifact 3 was never tested
    assert!(!user.contains("Support calls predict churn"));

    let events = drain(&mut rx);
    let streamed: String = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::SynthesisDelta { delta } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, SYNTHESIS);
    assert!(matches!(events.last(), Some(PipelineEvent::SynthesisCompleted)));
}

#[tokio::test]
async fn test_regeneration_discards_synthesis() {
    let h = harness("hypothesis", rules(), hypothesis_worker);
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    h.session.test_artifact(0).await.unwrap();
    h.session.synthesize().await.unwrap();

    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    assert!(h.session.synthesis().await.is_none());
    assert!(matches!(
        h.session.synthesize().await,
        Err(WorkbenchError::NothingToSynthesize)
    ));
}
