//! Domain types for event meal planning
//!
//! - [`PlanningRecord`]: per-session state (stage, guests, attributes, menu)
//! - [`Recipe`]: one dish and its ingredient lifecycle
//! - [`ExtractionDiff`]: sparse typed update from one extraction pass
//! - [`ShoppingList`]: aggregated, grouped list produced by the pipeline
//! - [`AgentRunState`]: bookkeeping for one pipeline run

mod diff;
mod id;
mod recipe;
mod record;
mod run;
mod shopping;

pub use diff::{ExtractionDiff, MenuDelta, Union};
pub use id::{IdResolver, generate_id, normalize_key, slugify};
pub use recipe::{
    Ingredient, PreparationMethod, Recipe, RecipeArtifact, RecipeStatus, RecipeType,
    SourceType,
};
pub use record::{
    CriticalField, DietaryRestriction, EventAttributes, GuestCounts, OutputFormat, PlanningRecord, Progress, Stage,
    StageError,
};
pub use run::{
    AgentRunState, DeliveryReport, DeliveryResult, DishScale, PipelineStep, ReviewDecision, ReviewEdit, RunStateError,
};
pub use shopping::{CategoryGroup, GroceryCategory, NeedsInput, ShoppingItem, ShoppingList};
