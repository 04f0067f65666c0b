//! Opaque external capabilities
//!
//! Field extraction, ingredient generation, artifact extraction and list
//! editing are black boxes behind these traits. Production callers plug in
//! model-backed implementations; the scripted ones drive simulations and tests.

use async_trait::async_trait;

mod error;
mod retry;
pub mod scripted;

pub use error::CapabilityError;
pub use retry::{RetryPolicy, call_with_retry};
pub use scripted::{ScriptedEditor, ScriptedExtractor, ScriptedSource};

use crate::domain::{ExtractionDiff, Ingredient, PlanningRecord, RecipeArtifact, ReviewEdit, ShoppingList};

/// Turns one user message into a sparse field update
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// May fail with [`CapabilityError::NoData`], which callers treat as an empty diff
    async fn extract_fields(&self, text: &str, record: &PlanningRecord) -> Result<ExtractionDiff, CapabilityError>;
}

/// Produces base-recipe ingredient lists at reference servings
#[async_trait]
pub trait IngredientSource: Send + Sync {
    async fn generate_default_ingredients(&self, dish: &str) -> Result<Vec<Ingredient>, CapabilityError>;

    /// Possibly empty; an empty list means nothing usable was found
    async fn extract_from_artifact(
        &self,
        dish: &str,
        artifact: &RecipeArtifact,
    ) -> Result<Vec<Ingredient>, CapabilityError>;
}

/// Interprets a natural-language correction of a shopping list
#[async_trait]
pub trait ShoppingListEditor: Send + Sync {
    async fn interpret(&self, list: &ShoppingList, instruction: &str) -> Result<Vec<ReviewEdit>, CapabilityError>;
}
