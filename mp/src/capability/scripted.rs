//! Scripted capability implementations
//!
//! Canned responses keyed by dish name, artifact label or instruction. Used
//! by `mp simulate` and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{CapabilityError, FieldExtractor, IngredientSource, ShoppingListEditor};
use crate::domain::{ExtractionDiff, Ingredient, PlanningRecord, RecipeArtifact, ReviewEdit, ShoppingList, normalize_key};

#[derive(Debug, Clone)]
enum Outcome {
    Ingredients(Vec<Ingredient>),
    Fail(CapabilityError),
    /// Never returns; exercises timeouts and cancellation
    Hang,
}

/// Ingredient source answering from a fixed script
#[derive(Debug, Default)]
pub struct ScriptedSource {
    dishes: HashMap<String, Outcome>,
    artifacts: HashMap<String, Outcome>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dish(mut self, dish: &str, ingredients: Vec<Ingredient>) -> Self {
        self.dishes.insert(normalize_key(dish), Outcome::Ingredients(ingredients));
        self
    }

    pub fn with_failure(mut self, dish: &str, error: CapabilityError) -> Self {
        self.dishes.insert(normalize_key(dish), Outcome::Fail(error));
        self
    }

    pub fn with_hang(mut self, dish: &str) -> Self {
        self.dishes.insert(normalize_key(dish), Outcome::Hang);
        self
    }

    /// Ingredients extracted from an artifact, keyed by its label (URL, filename or text)
    pub fn with_artifact(mut self, label: &str, ingredients: Vec<Ingredient>) -> Self {
        self.artifacts.insert(label.to_string(), Outcome::Ingredients(ingredients));
        self
    }

    /// Sleep before answering every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls made for a dish (generation and extraction combined)
    pub fn calls_for(&self, dish: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(&normalize_key(dish)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.values().sum()
    }

    fn record_call(&self, dish: &str) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls.entry(normalize_key(dish)).or_insert(0) += 1;
    }

    async fn answer(
        &self,
        outcome: Option<Outcome>,
        missing: Result<Vec<Ingredient>, CapabilityError>,
    ) -> Result<Vec<Ingredient>, CapabilityError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match outcome {
            Some(Outcome::Ingredients(list)) => Ok(list),
            Some(Outcome::Fail(e)) => Err(e),
            Some(Outcome::Hang) => std::future::pending().await,
            None => missing,
        }
    }
}

#[async_trait]
impl IngredientSource for ScriptedSource {
    async fn generate_default_ingredients(&self, dish: &str) -> Result<Vec<Ingredient>, CapabilityError> {
        debug!(%dish, "ScriptedSource::generate_default_ingredients: called");
        self.record_call(dish);
        let outcome = self.dishes.get(&normalize_key(dish)).cloned();
        self.answer(
            outcome,
            Err(CapabilityError::Malformed(format!("no ingredients generated for {}", dish))),
        )
        .await
    }

    async fn extract_from_artifact(
        &self,
        dish: &str,
        artifact: &RecipeArtifact,
    ) -> Result<Vec<Ingredient>, CapabilityError> {
        debug!(%dish, label = %artifact.label(), "ScriptedSource::extract_from_artifact: called");
        self.record_call(dish);
        let outcome = self.artifacts.get(&artifact.label()).cloned();
        self.answer(outcome, Ok(Vec::new())).await
    }
}

/// Field extractor replaying queued diffs, one per message
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    queue: Mutex<VecDeque<Result<ExtractionDiff, CapabilityError>>>,
}

impl ScriptedExtractor {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<ExtractionDiff, CapabilityError>>,
    {
        Self {
            queue: Mutex::new(responses.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl FieldExtractor for ScriptedExtractor {
    async fn extract_fields(&self, text: &str, _record: &PlanningRecord) -> Result<ExtractionDiff, CapabilityError> {
        debug!(len = text.len(), "ScriptedExtractor::extract_fields: called");
        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        next.unwrap_or(Err(CapabilityError::NoData))
    }
}

/// List editor mapping known instructions to typed edits
#[derive(Debug, Default)]
pub struct ScriptedEditor {
    responses: HashMap<String, Vec<ReviewEdit>>,
}

impl ScriptedEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instruction(mut self, instruction: &str, edits: Vec<ReviewEdit>) -> Self {
        self.responses.insert(normalize_key(instruction), edits);
        self
    }
}

#[async_trait]
impl ShoppingListEditor for ScriptedEditor {
    async fn interpret(&self, _list: &ShoppingList, instruction: &str) -> Result<Vec<ReviewEdit>, CapabilityError> {
        debug!(%instruction, "ScriptedEditor::interpret: called");
        self.responses
            .get(&normalize_key(instruction))
            .cloned()
            .ok_or(CapabilityError::NoData)
    }
}
