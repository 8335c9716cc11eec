//! Per-artifact test runs: code generation, execution, interpretation

use super::common::*;
use serde_json::json;
use std::time::Duration;
use workbench::domain::{presets, DomainRegistry};
use workbench::llm::ReplayRule;
use workbench::sandbox::InlineReply;
use workbench::WorkbenchError;
use workbench_sdk::{PipelineEvent, PipelineState};

const INTERPRETATION: &str = "##### Younger customers churn more\nThe difference is **clearly significant**.";

fn hypothesis_rules(titles: &[&str]) -> Vec<ReplayRule> {
    vec![
        ReplayRule::reply(hypotheses_reply(titles)).when_system(HYPOTHESIS_GENERATION),
        ReplayRule::reply(code_reply(RAISING_TEST))
            .when_system(HYPOTHESIS_EVALUATION)
            .when_user("Hypothesis: Plan type drives churn"),
        ReplayRule::reply(code_reply(PASSING_TEST)).when_system(HYPOTHESIS_EVALUATION),
        ReplayRule::reply(INTERPRETATION).when_system(HYPOTHESIS_INTERPRETATION),
    ]
}

#[tokio::test]
async fn test_passing_hypothesis_is_interpreted() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&["Younger customers churn more"]),
        |request| {
            // Hypothesis tests take only the frame
            if !request.code.ends_with("test_hypothesis(pd.DataFrame(data))")
                || request.context != json!({})
                || request.data.len() != 2
            {
                return Some(InlineReply::error("unexpected request"));
            }
            hypothesis_worker(request)
        },
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    let mut rx = h.session.subscribe();

    let outcome = h.session.test_artifact(0).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.score.as_f64(), Some(0.01));
    assert_eq!(outcome.label, "p-value");

    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Done);
    assert_eq!(card.outcome_text, INTERPRETATION);
    assert!(card.commentary.starts_with("Here is the test."));
    assert!(card
        .code
        .as_deref()
        .unwrap()
        .starts_with("import pandas as pd\n\ndef test_hypothesis(df):"));

    let states: Vec<PipelineState> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::StateChanged { artifact: 0, state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PipelineState::GeneratingCode,
            PipelineState::Executing,
            PipelineState::Interpreting,
            PipelineState::Done
        ]
    );

    // The interpretation prompt carries the normalized outcome
    let requests = h.client.requests();
    let interpretation = requests
        .iter()
        .find(|r| r.system_prompt().unwrap().contains(HYPOTHESIS_INTERPRETATION))
        .unwrap();
    assert!(interpretation
        .user_prompt()
        .unwrap()
        .ends_with("Result: true. p-value: 0.01"));
}

#[tokio::test]
async fn test_failing_artifact_leaves_siblings_alone() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&[
            "Younger customers churn more",
            "Plan type drives churn",
            "Support calls predict churn",
        ]),
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let results = h.session.run_all().await;

    let indices: Vec<usize> = results.iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(results[0].1.is_ok());
    assert!(matches!(results[1].1, Err(WorkbenchError::Execution(ref msg)) if msg == "ValueError: boom"));
    assert!(results[2].1.is_ok());

    let cards = h.session.cards().await;
    assert_eq!(cards[0].state, PipelineState::Done);
    assert_eq!(cards[1].state, PipelineState::Failed);
    assert_eq!(cards[2].state, PipelineState::Done);
    assert_eq!(cards[1].outcome_text, "ValueError: boom");
    assert_eq!(cards[0].outcome_text, INTERPRETATION);

    // Every run used its own worker
    assert_eq!(h.workers.spawned(), 3);
    assert_eq!(h.workers.terminated(), 3);
}

#[tokio::test]
async fn test_run_all_skips_tested_artifacts() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&["Younger customers churn more", "Support calls predict churn"]),
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    h.session.test_artifact(1).await.unwrap();
    let results = h.session.run_all().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, 0);
    assert!(matches!(
        h.session.test_artifact(1).await,
        Err(WorkbenchError::InvalidTransition { artifact: 1, .. })
    ));
}

#[tokio::test]
async fn test_reply_without_code_block_skips_sandbox() {
    let h = harness(
        "hypothesis",
        vec![
            ReplayRule::reply(hypotheses_reply(&["Younger customers churn more"]))
                .when_system(HYPOTHESIS_GENERATION),
            ReplayRule::reply("I would use a chi-square test here.").when_system(HYPOTHESIS_EVALUATION),
        ],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let result = h.session.test_artifact(0).await;

    assert!(matches!(result, Err(WorkbenchError::NoCodeBlock { ref language }) if language == "python"));
    assert_eq!(h.workers.spawned(), 0);
    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Failed);
    assert_eq!(card.commentary, "I would use a chi-square test here.");
}

#[tokio::test]
async fn test_sandbox_timeout_fails_the_artifact() {
    let mut config = config("hypothesis");
    config.sandbox_timeout = Duration::from_millis(100);
    let h = harness_with(
        DomainRegistry::with_defaults().unwrap(),
        config,
        hypothesis_rules(&["Younger customers churn more"]),
        |_| None,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let result = h.session.test_artifact(0).await;

    assert!(matches!(result, Err(WorkbenchError::Execution(ref msg)) if msg.contains("timed out")));
    assert_eq!(h.workers.terminated(), 1);
    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Failed);
    assert!(card.outcome_text.contains("timed out after 100 ms"));
}

#[tokio::test]
async fn test_blank_evaluation_prompt_is_missing_prompt() {
    let mut blank = presets::quality();
    blank.id = "blank".to_string();
    blank.evaluation.system = String::new();
    let mut registry = DomainRegistry::with_defaults().unwrap();
    registry.register(blank).unwrap();

    let h = harness_with(
        registry,
        config("blank"),
        vec![ReplayRule::reply(r#"{"checks":[{"title":"Deduplicate rows","details":"Drop duplicates"}]}"#)],
        |_| Some(InlineReply::error("unreachable")),
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&form(&[])).await.unwrap();
    h.session.set_evaluation_prompt("  \n").await;

    let result = h.session.test_artifact(0).await;

    assert!(matches!(result, Err(WorkbenchError::MissingPrompt)));
    assert_eq!(h.client.call_count(), 1);
    assert_eq!(h.session.cards().await[0].state, PipelineState::Failed);
}

#[tokio::test]
async fn test_evaluation_prompt_override_until_domain_switch() {
    let h = harness(
        "hypothesis",
        vec![
            ReplayRule::reply(hypotheses_reply(&["Younger customers churn more"]))
                .when_system(HYPOTHESIS_GENERATION),
            ReplayRule::reply(code_reply(PASSING_TEST)).when_system("Use a Mann-Whitney U test"),
            ReplayRule::reply(INTERPRETATION).when_system(HYPOTHESIS_INTERPRETATION),
        ],
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let default_prompt = h.session.evaluation_prompt().await;
    assert!(default_prompt.contains(HYPOTHESIS_EVALUATION));

    h.session
        .set_evaluation_prompt("Use a Mann-Whitney U test and return (success, p_value).")
        .await;
    h.session.test_artifact(0).await.unwrap();
    assert!(h.session.evaluation_prompt().await.starts_with("Use a Mann-Whitney U test"));

    h.session.set_domain("hypothesis").await.unwrap();
    assert_eq!(h.session.evaluation_prompt().await, default_prompt);
}

#[tokio::test]
async fn test_reset_allows_retesting() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&["Plan type drives churn"]),
        hypothesis_worker,
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();
    assert!(h.session.test_artifact(0).await.is_err());

    h.session.reset_artifact(0).await.unwrap();

    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Idle);
    assert!(card.outcome_text.is_empty());
    assert!(card.code.is_none());
    assert_eq!(h.session.run_all().await.len(), 1);
    assert_eq!(h.session.reset_all().await, 1);
    assert!(matches!(
        h.session.reset_artifact(5).await,
        Err(WorkbenchError::ArtifactNotFound(5))
    ));
}

#[tokio::test]
async fn test_domain_switch_mid_run_is_stale() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&["Younger customers churn more"]),
        |_| Some(InlineReply::ok(json!([true, 0.01])).after(Duration::from_millis(300))),
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let (result, switched) = tokio::join!(h.session.test_artifact(0), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.session.set_domain("modeling").await
    });

    switched.unwrap();
    assert!(matches!(result, Err(WorkbenchError::Stale)));
    assert!(h.session.cards().await.is_empty());
}

#[tokio::test]
async fn test_cancel_inflight_stops_execution_wait() {
    let h = harness(
        "hypothesis",
        hypothesis_rules(&["Younger customers churn more"]),
        |_| Some(InlineReply::ok(json!([true, 0.01])).after(Duration::from_secs(3))),
    );
    h.session.load_dataset(churn_rows()).await;
    h.session.generate_artifacts(&hypothesis_form()).await.unwrap();

    let (result, _) = tokio::join!(h.session.test_artifact(0), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.session.cancel_inflight().await
    });

    assert!(matches!(result, Err(WorkbenchError::Cancelled)));
    let card = &h.session.cards().await[0];
    assert_eq!(card.state, PipelineState::Failed);
    assert_eq!(card.outcome_text, "operation cancelled");
}

#[tokio::test]
async fn test_unknown_artifact_index() {
    let h = harness("hypothesis", Vec::new(), hypothesis_worker);
    h.session.load_dataset(churn_rows()).await;

    assert!(matches!(
        h.session.test_artifact(0).await,
        Err(WorkbenchError::ArtifactNotFound(0))
    ));
}
