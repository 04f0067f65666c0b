//! PlanningRecord - the mutable per-session planning state
//!
//! The record is owned by its session and mutated only by the extraction
//! merger and the agent pipeline. Stage changes go through `advance_to`, which
//! enforces single-step forward movement and the guard for the target stage.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::recipe::{Recipe, RecipeStatus};
use super::run::AgentRunState;

/// Top-level conversation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Gathering,
    RecipeConfirmation,
    SelectingOutput,
    AgentRunning,
    Complete,
}

impl Stage {
    /// The only stage this one may advance to
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Gathering => Some(Self::RecipeConfirmation),
            Self::RecipeConfirmation => Some(Self::SelectingOutput),
            Self::SelectingOutput => Some(Self::AgentRunning),
            Self::AgentRunning => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gathering => "gathering",
            Self::RecipeConfirmation => "recipe_confirmation",
            Self::SelectingOutput => "selecting_output",
            Self::AgentRunning => "agent_running",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage guard rejection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("cannot move from {from} to {to}: stages advance one step at a time")]
    NotAdjacent { from: Stage, to: Stage },

    #[error("cannot enter {target}: {reason}")]
    GuardNotSatisfied { target: Stage, reason: String },
}

/// Adult and child head counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuestCounts {
    pub adults: u32,
    pub children: u32,
}

impl GuestCounts {
    pub fn new(adults: u32, children: u32) -> Self {
        Self { adults, children }
    }

    pub fn total(&self) -> u32 {
        self.adults.saturating_add(self.children)
    }
}

/// Fields whose explicit answer drives the completion score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalField {
    EventType,
    GuestCount,
    GuestBreakdown,
    Dietary,
    Cuisine,
    MealPlan,
}

impl CriticalField {
    pub const ALL: [CriticalField; 6] = [
        Self::EventType,
        Self::GuestCount,
        Self::GuestBreakdown,
        Self::Dietary,
        Self::Cuisine,
        Self::MealPlan,
    ];

    /// Weight in percent; all weights sum to 100
    pub fn weight(&self) -> u32 {
        match self {
            Self::EventType => 15,
            Self::GuestCount => 20,
            Self::GuestBreakdown => 15,
            Self::Dietary => 15,
            Self::Cuisine => 10,
            Self::MealPlan => 25,
        }
    }
}

/// A dietary restriction, unioned by normalized kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DietaryRestriction {
    pub kind: String,
    /// How many guests it applies to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DietaryRestriction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            count: None,
            notes: None,
        }
    }
}

/// Known event fields, each independently optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventAttributes {
    pub event_type: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub duration_hours: Option<f64>,
    pub formality: Option<String>,
    pub meal_type: Option<String>,
    pub budget: Option<f64>,
    pub beverages_preferences: Option<String>,
    #[serde(default)]
    pub dietary_restrictions: Vec<DietaryRestriction>,
    #[serde(default)]
    pub cuisine_preferences: Vec<String>,
    #[serde(default)]
    pub available_equipment: Vec<String>,
    #[serde(default)]
    pub foods_to_avoid: Vec<String>,
}

/// Delivery destination for the approved shopping list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    GoogleSheet,
    GoogleTasks,
    InChat,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleSheet => "google_sheet",
            Self::GoogleTasks => "google_tasks",
            Self::InChat => "in_chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "google_sheet" | "google_sheets" | "sheet" | "spreadsheet" => Some(Self::GoogleSheet),
            "google_tasks" | "tasks" => Some(Self::GoogleTasks),
            "in_chat" | "chat" => Some(Self::InChat),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress breakdown shown alongside the completion score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub answered: usize,
    pub total: usize,
    pub score: f64,
    pub recipes: usize,
    pub resolved: usize,
}

/// Per-session planning state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningRecord {
    pub session_id: String,

    #[serde(default)]
    pub stage: Stage,

    #[serde(default)]
    pub guests: GuestCounts,

    #[serde(default)]
    pub attributes: EventAttributes,

    /// Critical fields explicitly set (not merely defaulted)
    #[serde(default)]
    pub answered: BTreeSet<CriticalField>,

    /// Menu in insertion order
    #[serde(default)]
    pub meal_plan: Vec<Recipe>,

    #[serde(default)]
    pub meal_plan_confirmed: bool,

    #[serde(default)]
    pub output_formats: BTreeSet<OutputFormat>,

    /// Current or last pipeline run; persisted so review survives restarts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_run: Option<AgentRunState>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanningRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        debug!(%session_id, "PlanningRecord::new: called");
        let now = Utc::now();
        Self {
            session_id,
            stage: Stage::Gathering,
            guests: GuestCounts::default(),
            attributes: EventAttributes::default(),
            answered: BTreeSet::new(),
            meal_plan: Vec::new(),
            meal_plan_confirmed: false,
            output_formats: BTreeSet::new(),
            agent_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Sum of the weights of answered critical fields, in percent
    pub fn answered_weight(&self) -> u32 {
        self.answered.iter().map(CriticalField::weight).sum()
    }

    /// Weighted fraction of critical fields answered, derived on every call
    pub fn completion_score(&self) -> f64 {
        f64::from(self.answered_weight()) / 100.0
    }

    pub fn is_fully_answered(&self) -> bool {
        self.answered_weight() >= 100
    }

    pub fn progress(&self) -> Progress {
        Progress {
            answered: self.answered.len(),
            total: CriticalField::ALL.len(),
            score: self.completion_score(),
            recipes: self.meal_plan.len(),
            resolved: self.meal_plan.iter().filter(|r| r.is_resolved()).count(),
        }
    }

    pub fn total_guests(&self) -> u32 {
        self.guests.total()
    }

    pub fn budget_per_person(&self) -> Option<f64> {
        let total = self.total_guests();
        match (self.attributes.budget, total) {
            (Some(budget), t) if t > 0 => Some(budget / f64::from(t)),
            _ => None,
        }
    }

    pub fn find_recipe(&self, name: &str) -> Option<&Recipe> {
        self.meal_plan.iter().find(|r| r.matches_name(name))
    }

    pub fn find_recipe_mut(&mut self, name: &str) -> Option<&mut Recipe> {
        self.meal_plan.iter_mut().find(|r| r.matches_name(name))
    }

    pub fn recipe_index(&self, name: &str) -> Option<usize> {
        self.meal_plan.iter().position(|r| r.matches_name(name))
    }

    /// Names of homemade dishes without an ingredient list
    pub fn pending_resolutions(&self) -> Vec<String> {
        self.meal_plan
            .iter()
            .filter(|r| r.needs_resolution())
            .map(|r| r.name.clone())
            .collect()
    }

    /// A pipeline run exists and has not reached a terminal step
    pub fn has_active_run(&self) -> bool {
        self.agent_run.as_ref().is_some_and(|run| !run.step.is_terminal())
    }

    /// Check whether `target`'s entry guard holds for the current record
    pub fn guard_satisfied(&self, target: Stage) -> Result<(), StageError> {
        let reject = |reason: &str| {
            Err(StageError::GuardNotSatisfied {
                target,
                reason: reason.to_string(),
            })
        };

        match target {
            Stage::Gathering => Ok(()),
            Stage::RecipeConfirmation => {
                if !self.is_fully_answered() {
                    return reject("not every critical question is answered");
                }
                if self.meal_plan.is_empty() {
                    return reject("the menu is empty");
                }
                if self.meal_plan.iter().any(|r| r.status == RecipeStatus::Placeholder) {
                    return reject("the menu still has unnamed dishes");
                }
                if self.total_guests() == 0 {
                    return reject("the guest count is zero");
                }
                Ok(())
            }
            Stage::SelectingOutput => self.all_recipes_ready().map_err(|reason| StageError::GuardNotSatisfied {
                target,
                reason,
            }),
            Stage::AgentRunning => {
                if self.stage != Stage::SelectingOutput {
                    return reject("output formats have not been selected yet");
                }
                if self.output_formats.is_empty() {
                    return reject("no output format is selected");
                }
                if self.total_guests() == 0 {
                    return reject("the guest count is zero");
                }
                self.all_recipes_ready()
                    .map_err(|reason| StageError::GuardNotSatisfied { target, reason })
            }
            Stage::Complete => match &self.agent_run {
                Some(run) if run.step == super::run::PipelineStep::Done => Ok(()),
                _ => reject("the shopping list has not been delivered"),
            },
        }
    }

    fn all_recipes_ready(&self) -> Result<(), String> {
        if self.meal_plan.is_empty() {
            return Err("the menu is empty".to_string());
        }
        let waiting: Vec<&str> = self
            .meal_plan
            .iter()
            .filter(|r| r.awaiting_user_input || !r.is_resolved())
            .map(|r| r.name.as_str())
            .collect();
        if waiting.is_empty() {
            Ok(())
        } else {
            Err(format!("waiting on ingredients for {}", waiting.join(", ")))
        }
    }

    /// Move forward exactly one stage if the target's guard holds
    pub fn advance_to(&mut self, target: Stage) -> Result<(), StageError> {
        debug!(session_id = %self.session_id, from = %self.stage, to = %target, "advance_to: called");
        if self.stage.next() != Some(target) {
            return Err(StageError::NotAdjacent {
                from: self.stage,
                to: target,
            });
        }
        self.guard_satisfied(target)?;
        self.stage = target;
        self.touch();
        Ok(())
    }

    /// Advance at most one stage if the next guard holds
    ///
    /// Covers the transitions a merge may fire. Entering `complete` is left to
    /// the pipeline.
    pub fn evaluate_transition(&mut self) -> Option<(Stage, Stage)> {
        let from = self.stage;
        let to = from.next()?;
        if to == Stage::Complete {
            return None;
        }
        match self.advance_to(to) {
            Ok(()) => {
                debug!(session_id = %self.session_id, %from, %to, "evaluate_transition: advanced");
                Some((from, to))
            }
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "evaluate_transition: guard not satisfied");
                None
            }
        }
    }

    /// Explicit return to gathering after a pipeline precondition failure
    pub fn reset_stage(&mut self) {
        debug!(session_id = %self.session_id, from = %self.stage, "reset_stage: called");
        self.stage = Stage::Gathering;
        self.output_formats.clear();
        self.meal_plan_confirmed = false;
        self.answered.remove(&CriticalField::MealPlan);
        self.touch();
    }

    /// Short human name: "Dinner Party for 10 · 2026-03-15"
    pub fn plan_name(&self) -> String {
        let kind = self
            .attributes
            .event_type
            .as_deref()
            .map(title_case)
            .unwrap_or_else(|| "Event".to_string());
        let mut name = kind;
        let total = self.total_guests();
        if total > 0 {
            name.push_str(&format!(" for {}", total));
        }
        if let Some(date) = self.attributes.event_date {
            name.push_str(&format!(" · {}", date.format("%Y-%m-%d")));
        }
        name
    }

    /// Delivery title: "Dinner Party Shopping - 03-15-2026"
    ///
    /// Falls back to today's date when the event date is unknown.
    pub fn shopping_title(&self) -> String {
        let kind = self
            .attributes
            .event_type
            .as_deref()
            .map(title_case)
            .unwrap_or_else(|| "Event".to_string());
        let date = self.attributes.event_date.unwrap_or_else(|| Utc::now().date_naive());
        format!("{} Shopping - {}", kind, date.format("%m-%d-%Y"))
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recipe::{PreparationMethod, SourceType};
    use crate::domain::shopping::GroceryCategory;
    use crate::domain::Ingredient;

    fn answered_record() -> PlanningRecord {
        let mut record = PlanningRecord::new("s1");
        record.answered = CriticalField::ALL.iter().copied().collect();
        record.guests = GuestCounts::new(8, 2);
        record.meal_plan.push(Recipe::new("Grilled Chicken"));
        record
    }

    fn complete(recipe: &mut Recipe) {
        recipe.complete_with(
            vec![Ingredient::new("chicken", 2.0, "lb", GroceryCategory::Proteins)],
            SourceType::AiDefault,
        );
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: u32 = CriticalField::ALL.iter().map(CriticalField::weight).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_completion_score_is_derived() {
        let mut record = PlanningRecord::new("s1");
        assert_eq!(record.completion_score(), 0.0);
        record.answered.insert(CriticalField::GuestCount);
        record.answered.insert(CriticalField::MealPlan);
        assert!((record.completion_score() - 0.45).abs() < 1e-12);
        record.answered = CriticalField::ALL.iter().copied().collect();
        assert_eq!(record.completion_score(), 1.0);
    }

    #[test]
    fn test_advance_requires_adjacent_stage() {
        let mut record = answered_record();
        let err = record.advance_to(Stage::SelectingOutput).unwrap_err();
        assert!(matches!(err, StageError::NotAdjacent { .. }));
        assert_eq!(record.stage, Stage::Gathering);
    }

    #[test]
    fn test_placeholder_blocks_recipe_confirmation() {
        let mut record = answered_record();
        record.meal_plan.push(Recipe::placeholder("dessert"));
        assert!(record.evaluate_transition().is_none());
        assert_eq!(record.stage, Stage::Gathering);
    }

    #[test]
    fn test_evaluate_transition_moves_one_step() {
        let mut record = answered_record();
        complete(&mut record.meal_plan[0]);
        // both guards hold, but only one step per evaluation
        assert_eq!(
            record.evaluate_transition(),
            Some((Stage::Gathering, Stage::RecipeConfirmation))
        );
        assert_eq!(record.stage, Stage::RecipeConfirmation);
        assert_eq!(
            record.evaluate_transition(),
            Some((Stage::RecipeConfirmation, Stage::SelectingOutput))
        );
        // selecting_output needs formats
        assert!(record.evaluate_transition().is_none());
    }

    #[test]
    fn test_awaiting_input_blocks_agent_running() {
        let mut record = answered_record();
        record.stage = Stage::RecipeConfirmation;
        record.meal_plan[0].mark_awaiting_input("generation timed out");
        record.output_formats.insert(OutputFormat::InChat);

        assert!(record.advance_to(Stage::AgentRunning).is_err());
        assert!(record.advance_to(Stage::SelectingOutput).is_err());
        assert_eq!(record.stage, Stage::RecipeConfirmation);
    }

    #[test]
    fn test_store_bought_satisfies_selecting_output() {
        let mut record = answered_record();
        record.stage = Stage::RecipeConfirmation;
        record.meal_plan[0].set_preparation(PreparationMethod::StoreBought);
        assert!(record.advance_to(Stage::SelectingOutput).is_ok());
    }

    #[test]
    fn test_budget_per_person() {
        let mut record = answered_record();
        assert_eq!(record.budget_per_person(), None);
        record.attributes.budget = Some(200.0);
        assert_eq!(record.budget_per_person(), Some(20.0));
    }

    #[test]
    fn test_plan_name_and_title() {
        let mut record = answered_record();
        record.attributes.event_type = Some("dinner party".to_string());
        record.attributes.event_date = NaiveDate::from_ymd_opt(2026, 3, 15);
        assert_eq!(record.plan_name(), "Dinner Party for 10 · 2026-03-15");
        assert_eq!(record.shopping_title(), "Dinner Party Shopping - 03-15-2026");
    }

    #[test]
    fn test_reset_stage_clears_selection() {
        let mut record = answered_record();
        record.stage = Stage::AgentRunning;
        record.output_formats.insert(OutputFormat::InChat);
        record.meal_plan_confirmed = true;
        record.reset_stage();
        assert_eq!(record.stage, Stage::Gathering);
        assert!(record.output_formats.is_empty());
        assert!(!record.answered.contains(&CriticalField::MealPlan));
    }
}
