//! Session - one conversation's planning record and everything acting on it
//!
//! A turn flows message → extraction → merge → stage transition, then the
//! session drives whatever the new stage needs: ingredient resolution during
//! recipe confirmation, the planning pipeline once outputs are chosen. The
//! record sits behind one mutex; long capability calls run on snapshots with
//! the lock released.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::error::SessionError;
use super::store::SessionStore;
use crate::capability::{CapabilityError, FieldExtractor, RetryPolicy, call_with_retry};
use crate::domain::{
    DeliveryReport, DeliveryResult, ExtractionDiff, OutputFormat, PipelineStep, PlanningRecord, Progress, Recipe,
    ReviewEdit, ShoppingList, Stage,
};
use crate::events::EventEmitter;
use crate::merge::{self, MergeOutcome};
use crate::pipeline::{AgentPipeline, PipelineError, RunContext};
use crate::resolver::Resolution;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionDeps {
    pub extractor: Arc<dyn FieldExtractor>,
    pub pipeline: Arc<AgentPipeline>,
    pub retry: RetryPolicy,
    /// Snapshots are written after every change when set
    pub store: Option<SessionStore>,
}

/// What one turn did
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub merge: Option<MergeOutcome>,
    /// The message was a review correction; this is the edited list
    pub review_edit: Option<ShoppingList>,
    pub resolutions: Vec<(String, Resolution)>,
    /// The list awaiting approval, when this turn started the pipeline
    pub review: Option<ShoppingList>,
    pub stage: Stage,
}

pub struct Session {
    id: String,
    record: Arc<Mutex<PlanningRecord>>,
    lease: Arc<Mutex<()>>,
    cancel_tx: watch::Sender<bool>,
    emitter: EventEmitter,
    deps: SessionDeps,
}

impl Session {
    pub fn new(record: PlanningRecord, emitter: EventEmitter, deps: SessionDeps) -> Self {
        let id = record.session_id.clone();
        debug!(session_id = %id, stage = %record.stage, "Session::new: called");
        let (cancel_tx, _) = watch::channel(false);
        Self {
            id,
            record: Arc::new(Mutex::new(record)),
            lease: Arc::new(Mutex::new(())),
            cancel_tx,
            emitter,
            deps,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub async fn snapshot(&self) -> PlanningRecord {
        self.record.lock().await.clone()
    }

    pub async fn stage(&self) -> Stage {
        self.record.lock().await.stage
    }

    pub async fn progress(&self) -> Progress {
        self.record.lock().await.progress()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    pub fn run_context(&self) -> RunContext {
        RunContext {
            record: self.record.clone(),
            lease: self.lease.clone(),
            emitter: self.emitter.clone(),
            cancel: self.cancel_tx.subscribe(),
        }
    }

    /// Handle one user message
    ///
    /// While the run awaits review, a message is first offered to the list
    /// editor as a correction; anything it cannot interpret is treated as a
    /// normal planning message.
    pub async fn handle_message(&self, text: &str) -> Result<TurnOutcome, SessionError> {
        debug!(session_id = %self.id, len = text.len(), "handle_message: called");
        self.ensure_live()?;

        if self.awaiting_review().await {
            let edit = ReviewEdit::Freeform {
                instruction: text.to_string(),
            };
            match self.deps.pipeline.apply_review_edit(&self.run_context(), edit).await {
                Ok(list) => {
                    self.checkpoint().await;
                    return Ok(TurnOutcome {
                        review_edit: Some(list),
                        stage: self.stage().await,
                        ..Default::default()
                    });
                }
                Err(PipelineError::Editor(e)) => {
                    debug!(session_id = %self.id, error = %e, "handle_message: not a list correction");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let snapshot = self.snapshot().await;
        let record = &snapshot;
        let extractor = &self.deps.extractor;
        let result = call_with_retry(&self.deps.retry, "extract_fields", move || {
            extractor.extract_fields(text, record)
        })
        .await;

        let diff = match result {
            Ok(diff) => diff,
            Err(CapabilityError::NoData) => {
                debug!(session_id = %self.id, "handle_message: nothing to extract");
                ExtractionDiff::default()
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "handle_message: extraction failed, record unchanged");
                self.emitter.warning("extract_fields", &e.to_string());
                ExtractionDiff::default()
            }
        };

        let merge = self.apply_diff(diff).await;
        let mut outcome = self.drive().await?;
        outcome.merge = Some(merge);
        Ok(outcome)
    }

    async fn awaiting_review(&self) -> bool {
        let record = self.record.lock().await;
        record
            .agent_run
            .as_ref()
            .is_some_and(|run| run.step == PipelineStep::AwaitingReview)
    }

    /// Merge a diff and report what changed
    pub async fn apply_diff(&self, diff: ExtractionDiff) -> MergeOutcome {
        let outcome = {
            let mut record = self.record.lock().await;
            merge::apply(&mut record, diff)
        };
        for rejection in &outcome.rejected {
            self.emitter.warning("merge", &rejection.to_string());
        }
        if let Some((from, to)) = outcome.transition {
            info!(session_id = %self.id, %from, %to, "apply_diff: stage changed");
            self.emitter.stage_changed(from, to);
        }
        if outcome.changed || outcome.transition.is_some() {
            self.checkpoint().await;
        }
        outcome
    }

    /// Do whatever the current stage needs before the next message
    pub async fn drive(&self) -> Result<TurnOutcome, SessionError> {
        let mut outcome = TurnOutcome::default();

        let (stage, pending) = {
            let record = self.record.lock().await;
            (record.stage, !record.pending_resolutions().is_empty())
        };
        if stage == Stage::RecipeConfirmation {
            if pending {
                outcome.resolutions = self.resolve_pending().await?;
            } else {
                self.settle_stage().await;
            }
        }

        let (stage, active) = {
            let record = self.record.lock().await;
            (record.stage, record.has_active_run())
        };
        if stage == Stage::AgentRunning && !active {
            outcome.review = Some(self.run_pipeline().await?);
        }

        outcome.stage = self.stage().await;
        Ok(outcome)
    }

    /// Take a transition whose guard became true outside a merge
    async fn settle_stage(&self) {
        let transition = self.record.lock().await.evaluate_transition();
        if let Some((from, to)) = transition {
            info!(session_id = %self.id, %from, %to, "settle_stage: stage changed");
            self.emitter.stage_changed(from, to);
            self.checkpoint().await;
        }
    }

    /// Resolve every dish still missing ingredients
    ///
    /// Results for a dish whose source changed while resolving are dropped;
    /// the next turn resolves the new source.
    pub async fn resolve_pending(&self) -> Result<Vec<(String, Resolution)>, SessionError> {
        self.ensure_live()?;
        let targets: Vec<Recipe> = {
            let record = self.record.lock().await;
            record.meal_plan.iter().filter(|r| r.needs_resolution()).cloned().collect()
        };
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        debug!(session_id = %self.id, count = targets.len(), "resolve_pending: called");

        let mut cancel = self.cancel_tx.subscribe();
        let resolver = self.deps.pipeline.resolver();
        let results = tokio::select! {
            results = resolver.resolve_all(&targets) => results,
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                warn!(session_id = %self.id, "resolve_pending: cancelled, discarding results");
                return Err(SessionError::Cancelled);
            }
        };

        let transition = {
            let mut record = self.record.lock().await;
            for ((dish, resolution), target) in results.iter().zip(&targets) {
                let Some(recipe) = record.find_recipe_mut(dish) else {
                    debug!(%dish, "resolve_pending: dish removed while resolving");
                    continue;
                };
                if recipe.artifact != target.artifact || recipe.source_type != target.source_type {
                    debug!(%dish, "resolve_pending: source changed while resolving");
                    continue;
                }
                if recipe.needs_resolution() {
                    resolution.apply_to(recipe);
                }
            }
            record.touch();
            record.evaluate_transition()
        };

        for (dish, resolution) in &results {
            let error = resolution.error().map(|e| e.user_message());
            self.emitter.resolution_settled(None, dish, error);
        }
        if let Some((from, to)) = transition {
            info!(session_id = %self.id, %from, %to, "resolve_pending: stage changed");
            self.emitter.stage_changed(from, to);
        }
        self.checkpoint().await;
        Ok(results)
    }

    /// Choose where the approved list goes
    pub async fn select_outputs(&self, formats: BTreeSet<OutputFormat>) -> Result<TurnOutcome, SessionError> {
        debug!(session_id = %self.id, ?formats, "select_outputs: called");
        self.ensure_live()?;
        if formats.is_empty() {
            return Err(SessionError::NoFormats);
        }
        let transition = {
            let mut record = self.record.lock().await;
            if record.stage != Stage::SelectingOutput {
                return Err(SessionError::WrongStage {
                    expected: Stage::SelectingOutput,
                    actual: record.stage,
                });
            }
            record.output_formats = formats;
            record.touch();
            record.evaluate_transition()
        };
        if let Some((from, to)) = transition {
            self.emitter.stage_changed(from, to);
        }
        self.checkpoint().await;
        self.drive().await
    }

    /// Start the pipeline; returns the list awaiting review
    pub async fn run_pipeline(&self) -> Result<ShoppingList, SessionError> {
        self.ensure_live()?;
        let result = self.deps.pipeline.start(&self.run_context()).await;
        self.checkpoint().await;
        Ok(result?)
    }

    pub async fn apply_review_edit(&self, edit: ReviewEdit) -> Result<ShoppingList, SessionError> {
        self.ensure_live()?;
        let result = self.deps.pipeline.apply_review_edit(&self.run_context(), edit).await;
        self.checkpoint().await;
        Ok(result?)
    }

    /// Approve the reviewed list, minus `exclusions`, and deliver it
    pub async fn approve(&self, exclusions: BTreeSet<String>) -> Result<DeliveryReport, SessionError> {
        self.ensure_live()?;
        let result = self.deps.pipeline.approve(&self.run_context(), exclusions).await;
        self.checkpoint().await;
        Ok(result?)
    }

    pub async fn retry_delivery(&self, format: OutputFormat) -> Result<DeliveryResult, SessionError> {
        self.ensure_live()?;
        let result = self.deps.pipeline.retry_delivery(&self.run_context(), format).await;
        self.checkpoint().await;
        Ok(result?)
    }

    /// Abort in-flight work; partial results are discarded
    pub fn cancel(&self) {
        info!(session_id = %self.id, "cancel: called");
        self.cancel_tx.send_replace(true);
        self.emitter.session_closed();
    }

    /// Write the record to the store, if there is one
    ///
    /// A cancelled session never writes: its id may already belong to a
    /// reset session or to nothing at all.
    pub async fn persist(&self) -> Result<(), SessionError> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        let record = self.snapshot().await;
        if self.is_cancelled() {
            debug!(session_id = %self.id, "persist: session cancelled, discarding record");
            return Ok(());
        }
        store.save(&record)?;
        Ok(())
    }

    async fn checkpoint(&self) {
        if let Err(e) = self.persist().await {
            error!(session_id = %self.id, error = %e, "checkpoint: failed to persist session");
            self.emitter.error("persist", &e.to_string());
        }
    }
}
