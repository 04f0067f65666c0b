//! AgentPipeline - the planning run state machine
//!
//! `calculating → resolving_ingredients → aggregating → awaiting_review →
//! delivering → done`, or `failed` when the run is entered with an unusable
//! record. The review checkpoint is a persisted step rather than a blocked
//! task: [`AgentPipeline::start`] returns once the list is ready and
//! [`AgentPipeline::approve`] picks the run up again, possibly in another
//! process after the session was reloaded.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{debug, info, warn};

use super::aggregate::{aggregate, compute_scales};
use super::error::PipelineError;
use crate::capability::{RetryPolicy, ShoppingListEditor, call_with_retry};
use crate::delivery::{DeliveryContext, DeliveryRouter};
use crate::domain::{
    AgentRunState, DeliveryReport, DeliveryResult, OutputFormat, PipelineStep, PlanningRecord, Recipe, RecipeStatus,
    ReviewEdit, ShoppingItem, ShoppingList, Stage,
};
use crate::events::EventEmitter;
use crate::quantity::QuantityTable;
use crate::render::Renderer;
use crate::resolver::RecipeResolver;

/// Everything a run needs from its session
#[derive(Clone)]
pub struct RunContext {
    pub record: Arc<Mutex<PlanningRecord>>,
    /// Held for the duration of every pipeline operation
    pub lease: Arc<Mutex<()>>,
    pub emitter: EventEmitter,
    /// Flips to true when the session is cancelled
    pub cancel: watch::Receiver<bool>,
}

impl RunContext {
    fn acquire(&self) -> Result<OwnedMutexGuard<()>, PipelineError> {
        self.lease.clone().try_lock_owned().map_err(|_| PipelineError::RunInProgress)
    }
}

/// Resolves once the session is cancelled; never if the sender is gone
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Why the record cannot be planned, if it cannot
fn precondition_failure(record: &PlanningRecord) -> Option<String> {
    if record.meal_plan.is_empty() {
        return Some("the menu is empty".to_string());
    }
    if record.total_guests() == 0 {
        return Some("the guest count is zero".to_string());
    }
    if record.meal_plan.iter().any(|r| r.status == RecipeStatus::Placeholder) {
        return Some("the menu still has unnamed dishes".to_string());
    }
    None
}

/// Apply one typed edit to a list
pub fn apply_edit(list: &mut ShoppingList, edit: &ReviewEdit) -> Result<(), PipelineError> {
    debug!(?edit, "apply_edit: called");
    match edit {
        ReviewEdit::Exclude { item } => {
            if !list.set_excluded(item, true) {
                return Err(PipelineError::UnknownItem(item.clone()));
            }
        }
        ReviewEdit::Include { item } => {
            if !list.set_excluded(item, false) {
                return Err(PipelineError::UnknownItem(item.clone()));
            }
        }
        ReviewEdit::SetQuantity { item, quantity, unit } => {
            if !quantity.is_finite() || *quantity <= 0.0 {
                return Err(PipelineError::InvalidEdit(format!(
                    "quantity for '{}' must be positive",
                    item
                )));
            }
            let found = list
                .find_item_mut(item)
                .ok_or_else(|| PipelineError::UnknownItem(item.clone()))?;
            found.total_quantity = *quantity;
            if let Some(unit) = unit {
                found.unit = unit.clone();
            }
        }
        ReviewEdit::Remove { item } => {
            list.remove_item(item)
                .ok_or_else(|| PipelineError::UnknownItem(item.clone()))?;
        }
        ReviewEdit::Add {
            name,
            quantity,
            unit,
            category,
        } => {
            if name.trim().is_empty() || !quantity.is_finite() || *quantity <= 0.0 {
                return Err(PipelineError::InvalidEdit(format!(
                    "cannot add '{}' with quantity {}",
                    name, quantity
                )));
            }
            list.add_item(ShoppingItem::new(name.trim(), *quantity, unit.clone(), *category));
        }
        ReviewEdit::Freeform { .. } => {
            return Err(PipelineError::InvalidEdit(
                "a correction must resolve to concrete edits".to_string(),
            ));
        }
    }
    Ok(())
}

/// Runs planning for one session at a time
pub struct AgentPipeline {
    resolver: RecipeResolver,
    table: QuantityTable,
    router: DeliveryRouter,
    editor: Arc<dyn ShoppingListEditor>,
    retry: RetryPolicy,
    renderer: Renderer,
}

impl AgentPipeline {
    pub fn new(
        resolver: RecipeResolver,
        table: QuantityTable,
        router: DeliveryRouter,
        editor: Arc<dyn ShoppingListEditor>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            table,
            router,
            editor,
            retry,
            renderer: Renderer::new(),
        }
    }

    pub fn resolver(&self) -> &RecipeResolver {
        &self.resolver
    }

    pub fn table(&self) -> &QuantityTable {
        &self.table
    }

    /// Mutate the live run, provided it is still the run we started
    async fn update_run<T>(
        &self,
        ctx: &RunContext,
        run_id: &str,
        f: impl FnOnce(&mut AgentRunState) -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut record = ctx.record.lock().await;
        let run = record
            .agent_run
            .as_mut()
            .filter(|run| run.run_id == run_id)
            .ok_or(PipelineError::NoRun)?;
        let value = f(run)?;
        record.touch();
        Ok(value)
    }

    /// Fail the run after cancellation; partial results are dropped
    async fn abandon(&self, ctx: &RunContext, run_id: &str) {
        warn!(%run_id, "abandon: session cancelled, discarding partial results");
        let result = self
            .update_run(ctx, run_id, |run| Ok(run.fail("cancelled")?))
            .await;
        if let Err(e) = result {
            debug!(%run_id, error = %e, "abandon: run already settled");
        }
        ctx.emitter.run_failed(run_id, "cancelled");
    }

    fn review_message(&self, title: &str, list: &ShoppingList) -> String {
        self.renderer.review(title, list).unwrap_or_else(|e| {
            warn!(error = %e, "review_message: render failed, using plain summary");
            format!("Shopping list ready: {} items. Approve to deliver.", list.item_count())
        })
    }

    /// Run from `calculating` up to the review checkpoint
    ///
    /// The record must be in `agent_running` with no active run. Inputs are
    /// snapshotted so conversation turns during the run never leak into it.
    pub async fn start(&self, ctx: &RunContext) -> Result<ShoppingList, PipelineError> {
        let _lease = ctx.acquire()?;

        let (run_id, mut menu, guests, title) = {
            let mut record = ctx.record.lock().await;
            debug!(session_id = %record.session_id, stage = %record.stage, "start: called");
            if record.has_active_run() {
                return Err(PipelineError::RunInProgress);
            }
            if record.stage != Stage::AgentRunning {
                return Err(PipelineError::WrongStage {
                    expected: Stage::AgentRunning,
                    actual: record.stage,
                });
            }

            let mut run = AgentRunState::new(&record.plan_name());
            if let Some(reason) = precondition_failure(&record) {
                warn!(session_id = %record.session_id, %reason, "start: precondition failed");
                run.fail(reason.clone())?;
                let run_id = run.run_id.clone();
                record.agent_run = Some(run);
                let from = record.stage;
                record.reset_stage();
                ctx.emitter.run_failed(&run_id, &reason);
                ctx.emitter.stage_changed(from, record.stage);
                return Err(PipelineError::Precondition(reason));
            }

            let snapshot = (
                run.run_id.clone(),
                record.meal_plan.clone(),
                record.guests,
                record.shopping_title(),
            );
            info!(session_id = %record.session_id, run_id = %run.run_id, "start: run started");
            record.agent_run = Some(run);
            record.touch();
            snapshot
        };

        // calculating
        ctx.emitter.pipeline_step(&run_id, PipelineStep::Calculating);
        let scales = compute_scales(&menu, guests, &self.table);
        let targets: Vec<Recipe> = menu.iter().filter(|r| !r.is_store_bought()).cloned().collect();
        let pending: BTreeSet<String> = menu
            .iter()
            .filter(|r| r.needs_resolution())
            .map(|r| r.name.clone())
            .collect();
        self.update_run(ctx, &run_id, |run| {
            run.scales = scales.clone();
            run.pending_resolutions = pending;
            Ok(run.advance(PipelineStep::ResolvingIngredients)?)
        })
        .await?;

        // resolving_ingredients: wait for every dish, not the first
        ctx.emitter.pipeline_step(&run_id, PipelineStep::ResolvingIngredients);
        let results = tokio::select! {
            results = self.resolver.resolve_all(&targets) => results,
            _ = cancelled(ctx.cancel.clone()) => {
                self.abandon(ctx, &run_id).await;
                return Err(PipelineError::Cancelled);
            }
        };

        {
            let mut record = ctx.record.lock().await;
            for (dish, resolution) in &results {
                if let Some(recipe) = menu.iter_mut().find(|r| r.matches_name(dish)) {
                    resolution.apply_to(recipe);
                }
                // cache onto the live record so nothing is generated twice
                if let Some(recipe) = record.find_recipe_mut(dish) {
                    if !recipe.is_resolved() {
                        resolution.apply_to(recipe);
                    }
                }
                let error = resolution.error().map(|e| e.user_message());
                ctx.emitter.resolution_settled(Some(&run_id), dish, error);
            }
            let run = record
                .agent_run
                .as_mut()
                .filter(|run| run.run_id == run_id)
                .ok_or(PipelineError::NoRun)?;
            run.pending_resolutions.clear();
            run.advance(PipelineStep::Aggregating)?;
            record.touch();
        }

        // aggregating
        ctx.emitter.pipeline_step(&run_id, PipelineStep::Aggregating);
        let list = aggregate(&menu, &scales);
        self.update_run(ctx, &run_id, |run| {
            run.shopping_list = Some(list.clone());
            Ok(run.advance(PipelineStep::AwaitingReview)?)
        })
        .await?;

        // awaiting_review: persisted, resumed by approve
        ctx.emitter.pipeline_step(&run_id, PipelineStep::AwaitingReview);
        let message = self.review_message(&title, &list);
        ctx.emitter.review_ready(&run_id, &list, &message);
        info!(%run_id, items = list.item_count(), "start: awaiting review");
        Ok(list)
    }

    /// Apply a correction while the run awaits review
    ///
    /// Freeform instructions go through the list editor capability first.
    /// All resulting edits apply atomically or not at all.
    pub async fn apply_review_edit(&self, ctx: &RunContext, edit: ReviewEdit) -> Result<ShoppingList, PipelineError> {
        let _lease = ctx.acquire()?;
        let (run_id, list) = {
            let record = ctx.record.lock().await;
            debug!(session_id = %record.session_id, ?edit, "apply_review_edit: called");
            let run = record.agent_run.as_ref().ok_or(PipelineError::NoRun)?;
            if run.step != PipelineStep::AwaitingReview {
                return Err(PipelineError::NotAwaitingReview(run.step));
            }
            (run.run_id.clone(), run.shopping_list.clone().unwrap_or_default())
        };

        let edits = match edit {
            ReviewEdit::Freeform { instruction } => {
                let editor = &self.editor;
                let current = &list;
                let text = instruction.as_str();
                call_with_retry(&self.retry, "interpret", move || editor.interpret(current, text)).await?
            }
            typed => vec![typed],
        };

        let mut updated = list.clone();
        for edit in &edits {
            apply_edit(&mut updated, edit)?;
        }

        self.update_run(ctx, &run_id, |run| {
            if run.step != PipelineStep::AwaitingReview {
                return Err(PipelineError::NotAwaitingReview(run.step));
            }
            run.shopping_list = Some(updated.clone());
            run.review_edits.extend(edits.iter().cloned());
            Ok(())
        })
        .await?;
        info!(%run_id, edits = edits.len(), "apply_review_edit: list updated");
        Ok(updated)
    }

    /// Approve the reviewed list and deliver it to every selected format
    ///
    /// The exclusion set replaces any per-item toggles. The record keeps the
    /// full list with exclusion flags; only the remaining items are delivered.
    pub async fn approve(&self, ctx: &RunContext, exclusions: BTreeSet<String>) -> Result<DeliveryReport, PipelineError> {
        let _lease = ctx.acquire()?;

        let (run_id, deliverable, formats, delivery_ctx, mut ledger) = {
            let mut guard = ctx.record.lock().await;
            let record = &mut *guard;
            debug!(session_id = %record.session_id, excluded = exclusions.len(), "approve: called");
            let delivery_ctx = DeliveryContext {
                title: record.shopping_title(),
                session_id: record.session_id.clone(),
            };
            let formats = record.output_formats.clone();

            let run = record.agent_run.as_mut().ok_or(PipelineError::NoRun)?;
            if run.step != PipelineStep::AwaitingReview {
                return Err(PipelineError::NotAwaitingReview(run.step));
            }
            let mut list = run.shopping_list.clone().unwrap_or_default();
            for name in list.set_exclusions(exclusions.iter()) {
                warn!(%name, "approve: excluded item is not on the list");
                ctx.emitter
                    .warning("approve", &format!("'{}' is not on the shopping list", name));
            }
            let deliverable = list.deliverable();
            run.decide(exclusions)?;
            run.shopping_list = Some(list);
            run.advance(PipelineStep::Delivering)?;
            let snapshot = (
                run.run_id.clone(),
                deliverable,
                formats,
                delivery_ctx,
                run.delivery.clone().unwrap_or_default(),
            );
            record.touch();
            snapshot
        };

        // delivering: every format concurrently, one attempt each
        ctx.emitter.pipeline_step(&run_id, PipelineStep::Delivering);
        let results = tokio::select! {
            results = self.router.deliver_all(&deliverable, &formats, &delivery_ctx, &mut ledger) => results,
            _ = cancelled(ctx.cancel.clone()) => {
                self.abandon(ctx, &run_id).await;
                return Err(PipelineError::Cancelled);
            }
        };
        for result in &results {
            ctx.emitter.delivery_finished(&run_id, result);
        }

        let mut record = ctx.record.lock().await;
        let from = record.stage;
        {
            let run = record
                .agent_run
                .as_mut()
                .filter(|run| run.run_id == run_id)
                .ok_or(PipelineError::NoRun)?;
            run.delivery = Some(ledger.clone());
            run.advance(PipelineStep::Done)?;
        }
        record.advance_to(Stage::Complete)?;
        ctx.emitter.pipeline_step(&run_id, PipelineStep::Done);
        ctx.emitter.stage_changed(from, Stage::Complete);
        ctx.emitter.run_completed(&run_id, &ledger);
        info!(
            %run_id,
            delivered = ledger.successes().count(),
            failed = ledger.failures().count(),
            "approve: run done"
        );
        Ok(ledger)
    }

    /// Explicit user re-trigger of a failed format after the run is done
    pub async fn retry_delivery(&self, ctx: &RunContext, format: OutputFormat) -> Result<DeliveryResult, PipelineError> {
        let _lease = ctx.acquire()?;
        let (run_id, deliverable, delivery_ctx, mut ledger) = {
            let record = ctx.record.lock().await;
            debug!(session_id = %record.session_id, %format, "retry_delivery: called");
            let run = record.agent_run.as_ref().ok_or(PipelineError::NoRun)?;
            if run.step != PipelineStep::Done {
                return Err(PipelineError::NotDelivered(run.step));
            }
            (
                run.run_id.clone(),
                run.shopping_list.as_ref().map(ShoppingList::deliverable).unwrap_or_default(),
                DeliveryContext {
                    title: record.shopping_title(),
                    session_id: record.session_id.clone(),
                },
                run.delivery.clone().unwrap_or_default(),
            )
        };

        let result = tokio::select! {
            result = self.router.retry(&deliverable, format, &delivery_ctx, &mut ledger) => result?,
            _ = cancelled(ctx.cancel.clone()) => return Err(PipelineError::Cancelled),
        };

        self.update_run(ctx, &run_id, |run| {
            run.delivery = Some(ledger);
            Ok(())
        })
        .await?;
        ctx.emitter.delivery_finished(&run_id, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GroceryCategory;

    fn list() -> ShoppingList {
        let mut list = ShoppingList::new();
        list.add_item(ShoppingItem::new("onion", 3.0, "whole", GroceryCategory::Produce));
        list.add_item(ShoppingItem::new("rice", 1.0, "kg", GroceryCategory::Pantry));
        list
    }

    #[test]
    fn test_apply_typed_edits() {
        let mut list = list();
        apply_edit(&mut list, &ReviewEdit::Exclude { item: "Onion".to_string() }).unwrap();
        assert!(list.find_item("onion").unwrap().excluded);

        apply_edit(
            &mut list,
            &ReviewEdit::SetQuantity {
                item: "rice".to_string(),
                quantity: 2.0,
                unit: None,
            },
        )
        .unwrap();
        assert_eq!(list.find_item("rice").unwrap().total_quantity, 2.0);

        apply_edit(
            &mut list,
            &ReviewEdit::Add {
                name: "limes".to_string(),
                quantity: 6.0,
                unit: "whole".to_string(),
                category: GroceryCategory::Produce,
            },
        )
        .unwrap();
        apply_edit(&mut list, &ReviewEdit::Remove { item: "rice".to_string() }).unwrap();
        assert_eq!(list.item_count(), 2);
        assert!(list.group(GroceryCategory::Pantry).is_none());
    }

    #[test]
    fn test_edit_errors() {
        let mut list = list();
        assert!(matches!(
            apply_edit(&mut list, &ReviewEdit::Exclude { item: "kale".to_string() }),
            Err(PipelineError::UnknownItem(_))
        ));
        assert!(matches!(
            apply_edit(
                &mut list,
                &ReviewEdit::SetQuantity {
                    item: "onion".to_string(),
                    quantity: 0.0,
                    unit: None
                }
            ),
            Err(PipelineError::InvalidEdit(_))
        ));
        assert!(matches!(
            apply_edit(
                &mut list,
                &ReviewEdit::Freeform {
                    instruction: "more onions".to_string()
                }
            ),
            Err(PipelineError::InvalidEdit(_))
        ));
    }

    #[test]
    fn test_precondition_failures() {
        let mut record = PlanningRecord::new("s");
        assert_eq!(precondition_failure(&record).as_deref(), Some("the menu is empty"));
        record.meal_plan.push(Recipe::new("Chili"));
        assert_eq!(precondition_failure(&record).as_deref(), Some("the guest count is zero"));
        record.guests.adults = 4;
        assert!(precondition_failure(&record).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(cancelled(rx));
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }
}
