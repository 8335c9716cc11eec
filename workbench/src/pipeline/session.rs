//! One user's workbench: active domain, dataset history and artifact cards
//!
//! All mutable state sits behind one lock that is never held across an LLM or
//! sandbox call. Operations that outlive a lock release carry the epoch they
//! started in; domain switches, dataset loads and regenerations bump it, and a
//! run that finds a newer epoch gives up with [`WorkbenchError::Stale`] instead
//! of writing into cards that no longer exist.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use workbench_sdk::{FormValues, PipelineEvent, PipelineState};

use super::batch::run_bounded;
use super::generate::{generation_request, validate_form, ArtifactCollector};
use super::synthesize::{synthesis_request, tested_artifacts};
use crate::artifact::{Artifact, ArtifactCard};
use crate::codeblock::extract_last_block;
use crate::config::WorkbenchConfig;
use crate::dataset::{self, describe, DatasetHistory, Snapshot};
use crate::domain::{Domain, DomainRegistry, EvaluationContext, InterpretationContext};
use crate::error::{Result, WorkbenchError};
use crate::llm::{collect_text, CompletionClient, CompletionRequest};
use crate::outcome::{normalize_outcome, Outcome};
use crate::sandbox::{ExecuteOptions, ExecutionBridge, Row};

const EVENT_CAPACITY: usize = 1024;

struct SessionState {
    domain: Arc<Domain>,
    dataset: DatasetHistory,
    /// Cached `describe` output for the current snapshot
    summary: Option<String>,
    cards: Vec<ArtifactCard>,
    /// User edit of the evaluation system prompt
    evaluation_override: Option<String>,
    synthesis: Option<String>,
    epoch: u64,
    cancel: CancellationToken,
}

impl SessionState {
    fn card_mut(&mut self, epoch: u64, index: usize) -> Result<&mut ArtifactCard> {
        if self.epoch != epoch {
            return Err(WorkbenchError::Stale);
        }
        self.cards
            .get_mut(index)
            .ok_or(WorkbenchError::ArtifactNotFound(index))
    }

    fn summary(&mut self) -> Result<String> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        let data = self.dataset.current().ok_or(WorkbenchError::NoDataset)?;
        let summary = describe(&data);
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Drop the artifact list and everything derived from it
    fn discard_artifacts(&mut self) {
        self.epoch += 1;
        self.cards.clear();
        self.synthesis = None;
    }

    /// Override when non-blank, else the domain default
    fn evaluation_system(&self) -> Option<String> {
        self.evaluation_override
            .iter()
            .chain(std::iter::once(&self.domain.evaluation.system))
            .find(|prompt| !prompt.trim().is_empty())
            .cloned()
    }
}

/// Everything one test run captured when it started
struct TestRun {
    index: usize,
    epoch: u64,
    domain: Arc<Domain>,
    artifact: Arc<Artifact>,
    system: Option<String>,
    summary: String,
    data: Snapshot,
    cancel: CancellationToken,
}

/// Pipeline controller for one user
pub struct Session {
    registry: Arc<DomainRegistry>,
    client: Arc<dyn CompletionClient>,
    bridge: Arc<ExecutionBridge>,
    config: WorkbenchConfig,
    events: broadcast::Sender<PipelineEvent>,
    state: RwLock<SessionState>,
    /// Held by a dataset-replacing run from snapshot capture until it finishes
    replacing: Mutex<()>,
}

impl Session {
    /// Start a session on the configured default domain
    pub fn new(
        registry: Arc<DomainRegistry>,
        client: Arc<dyn CompletionClient>,
        bridge: Arc<ExecutionBridge>,
        config: WorkbenchConfig,
    ) -> Result<Self> {
        let domain = registry.get(&config.default_domain)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            registry,
            client,
            bridge,
            config,
            events,
            state: RwLock::new(SessionState {
                domain,
                dataset: DatasetHistory::default(),
                summary: None,
                cards: Vec::new(),
                evaluation_override: None,
                synthesis: None,
                epoch: 0,
                cancel: CancellationToken::new(),
            }),
            replacing: Mutex::new(()),
        })
    }

    /// Receive pipeline events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &ExecutionBridge {
        &self.bridge
    }

    // ------------------------------------------------------------------
    // Domain
    // ------------------------------------------------------------------

    pub async fn domain(&self) -> Arc<Domain> {
        self.state.read().await.domain.clone()
    }

    /// Switch domains, discarding artifacts, the cached summary and any
    /// evaluation prompt edit
    pub async fn set_domain(&self, id: &str) -> Result<()> {
        let domain = self.registry.get(id)?;
        {
            let mut state = self.state.write().await;
            state.domain = domain;
            state.summary = None;
            state.evaluation_override = None;
            state.discard_artifacts();
        }

        tracing::info!(domain = %id, "domain changed");
        self.publish(PipelineEvent::DomainChanged {
            domain: id.to_string(),
        });
        self.publish(PipelineEvent::ArtifactsUpdated {
            artifacts: Vec::new(),
        });
        Ok(())
    }

    /// Evaluation system prompt in effect
    pub async fn evaluation_prompt(&self) -> String {
        self.state
            .read()
            .await
            .evaluation_system()
            .unwrap_or_default()
    }

    /// Replace the evaluation system prompt until the next domain switch
    pub async fn set_evaluation_prompt(&self, prompt: impl Into<String>) {
        self.state.write().await.evaluation_override = Some(prompt.into());
    }

    // ------------------------------------------------------------------
    // Dataset
    // ------------------------------------------------------------------

    /// Make `rows` the current dataset, discarding artifacts and undo history
    pub async fn load_dataset(&self, rows: Vec<Row>) -> Snapshot {
        let snapshot = {
            let mut state = self.state.write().await;
            let snapshot = state.dataset.load(rows);
            state.summary = None;
            state.discard_artifacts();
            snapshot
        };

        let columns = snapshot.first().map_or(0, |row| row.len());
        tracing::info!(rows = snapshot.len(), columns, "dataset loaded");
        self.publish(PipelineEvent::DatasetLoaded {
            rows: snapshot.len(),
            columns,
        });
        self.publish(PipelineEvent::ArtifactsUpdated {
            artifacts: Vec::new(),
        });
        snapshot
    }

    /// Load a CSV, JSON or SQLite file as the current dataset
    pub async fn load_dataset_file(&self, path: &Path) -> Result<Snapshot> {
        let rows = dataset::load_dataset(path)?;
        Ok(self.load_dataset(rows).await)
    }

    pub async fn dataset(&self) -> Option<Snapshot> {
        self.state.read().await.dataset.current()
    }

    pub async fn undo_depth(&self) -> usize {
        self.state.read().await.dataset.undo_depth()
    }

    /// Restore the snapshot a cleaning run replaced; `None` when there is
    /// nothing to undo
    pub async fn undo_dataset(&self) -> Option<Snapshot> {
        let (snapshot, undo_depth) = {
            let mut state = self.state.write().await;
            let snapshot = state.dataset.undo()?;
            state.summary = None;
            (snapshot, state.dataset.undo_depth())
        };

        tracing::info!(rows = snapshot.len(), undo_depth, "dataset restored");
        self.publish(PipelineEvent::DatasetRestored {
            rows: snapshot.len(),
            undo_depth,
        });
        Some(snapshot)
    }

    /// Description of the current dataset as shown to the LLM
    pub async fn dataset_summary(&self) -> Result<String> {
        self.state.write().await.summary()
    }

    async fn replace_dataset(&self, epoch: u64, base: &Snapshot, rows: Vec<Row>) -> Result<()> {
        let (rows_before, rows_after, undo_depth) = {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                return Err(WorkbenchError::Stale);
            }
            let (before, after) = state.dataset.replace(base, rows)?;
            state.summary = None;
            (before, after, state.dataset.undo_depth())
        };

        tracing::info!(rows_before, rows_after, undo_depth, "dataset replaced by cleaned snapshot");
        self.publish(PipelineEvent::DatasetReplaced {
            rows_before,
            rows_after,
            undo_depth,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    pub async fn cards(&self) -> Vec<ArtifactCard> {
        self.state.read().await.cards.clone()
    }

    pub async fn artifacts(&self) -> Vec<Arc<Artifact>> {
        self.state
            .read()
            .await
            .cards
            .iter()
            .map(|card| card.artifact.clone())
            .collect()
    }

    /// Stream a fresh artifact list from the LLM.
    ///
    /// The previous list is discarded up front. [`PipelineEvent::ArtifactsUpdated`]
    /// fires whenever another complete artifact has been parsed.
    pub async fn generate_artifacts(&self, form_values: &FormValues) -> Result<Vec<Arc<Artifact>>> {
        let result = self.generate(form_values).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "artifact generation failed");
            self.publish(PipelineEvent::GenerationFailed {
                error: e.to_string(),
            });
        }
        result
    }

    async fn generate(&self, form_values: &FormValues) -> Result<Vec<Arc<Artifact>>> {
        let (domain, summary, epoch, cancel) = {
            let mut state = self.state.write().await;
            // Blank required fields fail before anything else happens
            validate_form(&state.domain, form_values)?;
            let summary = state.summary()?;
            state.discard_artifacts();
            (state.domain.clone(), summary, state.epoch, state.cancel.clone())
        };
        self.publish(PipelineEvent::ArtifactsUpdated {
            artifacts: Vec::new(),
        });

        let request = generation_request(&domain, form_values, &summary)?.with_cancel(cancel);
        tracing::info!(domain = %domain.id, "generating artifacts");

        let mut collector = ArtifactCollector::new(&domain);
        let events = &self.events;
        collect_text(self.client.as_ref(), request, |_, text| {
            if collector.update(text) {
                let _ = events.send(PipelineEvent::ArtifactsUpdated {
                    artifacts: collector.raw(),
                });
            }
        })
        .await?;
        let artifacts = collector.finish()?;

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return Err(WorkbenchError::Stale);
        }
        state.cards = artifacts.into_iter().map(ArtifactCard::new).collect();
        tracing::info!(domain = %domain.id, count = state.cards.len(), "artifacts generated");
        Ok(state.cards.iter().map(|card| card.artifact.clone()).collect())
    }

    /// Generate code for one artifact, run it and interpret the outcome.
    ///
    /// On failure the card ends in [`PipelineState::Failed`] with the error as
    /// its outcome text; sibling cards are never touched. Runs of a domain that
    /// replaces the dataset go one at a time, each cleaning the snapshot left
    /// by the previous one.
    pub async fn test_artifact(&self, index: usize) -> Result<Outcome> {
        let replaces_dataset = self.state.read().await.domain.execution.replaces_dataset;
        let _replacing = if replaces_dataset {
            Some(self.replacing.lock().await)
        } else {
            None
        };

        let run = {
            let mut state = self.state.write().await;
            let data = state.dataset.current().ok_or(WorkbenchError::NoDataset)?;
            let summary = state.summary()?;
            let domain = state.domain.clone();
            let system = state.evaluation_system();
            let cancel = state.cancel.clone();
            let epoch = state.epoch;

            let card = state.card_mut(epoch, index)?;
            card.transition(index, PipelineState::GeneratingCode)?;
            TestRun {
                index,
                epoch,
                domain,
                artifact: card.artifact.clone(),
                system,
                summary,
                data,
                cancel,
            }
        };
        self.state_changed(index, PipelineState::GeneratingCode);

        match self.run_test(&run).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&run, &e).await;
                Err(e)
            }
        }
    }

    async fn run_test(&self, run: &TestRun) -> Result<Outcome> {
        let index = run.index;
        let domain = &run.domain;

        let system = run.system.clone().ok_or(WorkbenchError::MissingPrompt)?;
        let ctx = EvaluationContext {
            artifact: run.artifact.clone(),
            dataset_summary: run.summary.clone(),
        };
        let request = CompletionRequest::new(system, domain.evaluation.user.resolve(&ctx))
            .with_cancel(run.cancel.clone());

        let events = &self.events;
        let response = collect_text(self.client.as_ref(), request, |delta, _| {
            let _ = events.send(PipelineEvent::CommentaryDelta {
                artifact: index,
                delta: delta.to_string(),
            });
        })
        .await?;

        let code = extract_last_block(&response, &domain.evaluation.language);
        self.state.write().await.card_mut(run.epoch, index)?.commentary = response;
        let code = code.ok_or_else(|| WorkbenchError::NoCodeBlock {
            language: domain.evaluation.language.clone(),
        })?;

        let program = domain.execution.program(&code);
        {
            let mut state = self.state.write().await;
            let card = state.card_mut(run.epoch, index)?;
            card.code = Some(program.clone());
            card.transition(index, PipelineState::Executing)?;
        }
        self.publish(PipelineEvent::CodeExtracted {
            artifact: index,
            code: program.clone(),
        });
        self.state_changed(index, PipelineState::Executing);

        let options = ExecuteOptions::default()
            .with_mode(domain.execution.isolation.unwrap_or(self.config.worker_mode))
            .with_timeout(self.config.sandbox_timeout);
        let context = domain.execution.context(&run.artifact);
        let raw = tokio::select! {
            _ = run.cancel.cancelled() => return Err(WorkbenchError::Cancelled),
            result = self.bridge.execute(program, run.data.clone(), context, options) => result?,
        };

        let outcome = normalize_outcome(domain.execution.outcome_shape, raw, &domain.score_label);
        tracing::info!(artifact = index, success = outcome.success, score = %outcome.score, "execution finished");
        self.publish(PipelineEvent::ExecutionFinished {
            artifact: index,
            success: outcome.success,
            score: outcome.score.to_value(),
        });

        if domain.execution.replaces_dataset && outcome.success {
            if let Some(rows) = outcome.replacement_rows() {
                self.replace_dataset(run.epoch, &run.data, rows).await?;
            }
        }

        {
            let mut state = self.state.write().await;
            let card = state.card_mut(run.epoch, index)?;
            card.outcome = Some(outcome.clone());
            card.transition(index, PipelineState::Interpreting)?;
        }
        self.state_changed(index, PipelineState::Interpreting);

        let outcome_text = match &domain.interpretation {
            Some(prompts) => {
                let ctx = InterpretationContext {
                    artifact: run.artifact.clone(),
                    dataset_summary: run.summary.clone(),
                    outcome: outcome.clone(),
                };
                let request =
                    CompletionRequest::new(prompts.system.resolve(&ctx), prompts.user.resolve(&ctx))
                        .with_cancel(run.cancel.clone());
                collect_text(self.client.as_ref(), request, |delta, _| {
                    let _ = events.send(PipelineEvent::OutcomeDelta {
                        artifact: index,
                        delta: delta.to_string(),
                    });
                })
                .await?
            }
            None => {
                let line = outcome.summary_line();
                self.publish(PipelineEvent::OutcomeDelta {
                    artifact: index,
                    delta: line.clone(),
                });
                line
            }
        };

        {
            let mut state = self.state.write().await;
            let card = state.card_mut(run.epoch, index)?;
            card.outcome_text = outcome_text;
            card.transition(index, PipelineState::Done)?;
        }
        self.state_changed(index, PipelineState::Done);
        Ok(outcome)
    }

    /// Put the card into `Failed` with the error as its outcome text
    async fn fail(&self, run: &TestRun, error: &WorkbenchError) {
        tracing::warn!(artifact = run.index, error = %error, "artifact test failed");
        {
            let mut state = self.state.write().await;
            let Ok(card) = state.card_mut(run.epoch, run.index) else {
                return;
            };
            if card.transition(run.index, PipelineState::Failed).is_err() {
                return;
            }
            card.error = Some(error.to_string());
            card.outcome_text = error.to_string();
        }
        self.publish(PipelineEvent::ArtifactFailed {
            artifact: run.index,
            error: error.to_string(),
        });
        self.state_changed(run.index, PipelineState::Failed);
    }

    fn state_changed(&self, index: usize, state: PipelineState) {
        tracing::info!(artifact = index, %state, "artifact state changed");
        self.publish(PipelineEvent::StateChanged {
            artifact: index,
            state,
        });
    }

    /// Test every card that has no outcome yet, at most
    /// `max_concurrent_tests` at a time. Results are in card order.
    pub async fn run_all(&self) -> Vec<(usize, Result<Outcome>)> {
        let pending: Vec<usize> = {
            let state = self.state.read().await;
            state
                .cards
                .iter()
                .enumerate()
                .filter(|(_, card)| card.is_untested())
                .map(|(index, _)| index)
                .collect()
        };
        tracing::info!(count = pending.len(), limit = self.config.max_concurrent_tests, "testing untested artifacts");

        let session = self;
        let mut results: Vec<(usize, Result<Outcome>)> =
            run_bounded(pending, self.config.max_concurrent_tests, move |index| async move {
                (index, session.test_artifact(index).await)
            })
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect();
        results.sort_by_key(|(index, _)| *index);
        results
    }

    /// Return a finished card to `Idle`, clearing its output
    pub async fn reset_artifact(&self, index: usize) -> Result<()> {
        {
            let mut state = self.state.write().await;
            let epoch = state.epoch;
            let card = state.card_mut(epoch, index)?;
            if card.state.is_active() {
                return Err(WorkbenchError::InvalidTransition {
                    artifact: index,
                    from: card.state,
                    to: PipelineState::Idle,
                });
            }
            card.reset();
        }
        self.state_changed(index, PipelineState::Idle);
        Ok(())
    }

    /// Reset every card that is not mid-run; returns how many were reset
    pub async fn reset_all(&self) -> usize {
        let reset: Vec<usize> = {
            let mut state = self.state.write().await;
            state
                .cards
                .iter_mut()
                .enumerate()
                .filter(|(_, card)| !card.state.is_active())
                .map(|(index, card)| {
                    card.reset();
                    index
                })
                .collect()
        };
        for &index in &reset {
            self.state_changed(index, PipelineState::Idle);
        }
        reset.len()
    }

    // ------------------------------------------------------------------
    // Synthesis
    // ------------------------------------------------------------------

    /// Summarize every artifact with a non-empty outcome
    pub async fn synthesize(&self) -> Result<String> {
        let result = self.run_synthesis().await;
        match &result {
            Ok(_) => self.publish(PipelineEvent::SynthesisCompleted),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed");
                self.publish(PipelineEvent::SynthesisFailed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_synthesis(&self) -> Result<String> {
        let (domain, tested, epoch, cancel) = {
            let state = self.state.read().await;
            (
                state.domain.clone(),
                tested_artifacts(&state.cards),
                state.epoch,
                state.cancel.clone(),
            )
        };
        let count = tested.len();
        let request = synthesis_request(&domain, tested)?.with_cancel(cancel);
        tracing::info!(domain = %domain.id, tested = count, "synthesizing");

        let events = &self.events;
        let text = collect_text(self.client.as_ref(), request, |delta, _| {
            let _ = events.send(PipelineEvent::SynthesisDelta {
                delta: delta.to_string(),
            });
        })
        .await?;

        let mut state = self.state.write().await;
        if state.epoch != epoch {
            return Err(WorkbenchError::Stale);
        }
        state.synthesis = Some(text.clone());
        Ok(text)
    }

    /// Latest synthesis for the current artifact list
    pub async fn synthesis(&self) -> Option<String> {
        self.state.read().await.synthesis.clone()
    }

    /// Cancel every LLM stream and sandbox wait started so far
    pub async fn cancel_inflight(&self) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        tracing::info!("cancelled in-flight operations");
    }
}
