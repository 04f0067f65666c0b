//! mealplan - conversational event meal planner
//!
//! A planning session gathers event details over several conversation turns,
//! confirms a menu, works out ingredient lists per dish, scales them to the
//! guest count and hands an approved shopping list to one or more outputs.
//!
//! # Modules
//!
//! - [`domain`] - planning record, recipes, extraction diffs, shopping list, run state
//! - [`merge`] - folds extraction diffs into the record and fires stage transitions
//! - [`quantity`] - portion table, scaling and unit reconciliation
//! - [`capability`] - opaque extraction, ingredient and editing capabilities
//! - [`resolver`] - per-dish ingredient resolution
//! - [`pipeline`] - the planning run: scale, resolve, aggregate, review, deliver
//! - [`delivery`] - output backends and the delivery router
//! - [`session`] - per-session handles, registry and JSON store
//! - [`events`] - event bus and JSONL event log
//! - [`render`] - embedded templates for in-chat output
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod capability;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod events;
pub mod merge;
pub mod pipeline;
pub mod quantity;
pub mod render;
pub mod resolver;
pub mod scenario;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    ExtractionDiff, MenuDelta, OutputFormat, PipelineStep, PlanningRecord, Recipe, ReviewEdit, ShoppingList, Stage,
};
pub use events::{EventBus, EventEmitter, PlanEvent, create_event_bus};
pub use merge::{MergeOutcome, MergeRejection};
pub use pipeline::{AgentPipeline, PipelineError, RunContext};
pub use resolver::{RecipeResolver, Resolution, ResolveError};
pub use session::{Session, SessionDeps, SessionError, SessionRegistry, SessionStore};
