//! AgentRunState - per-run pipeline bookkeeping
//!
//! A run moves strictly forward through its steps; the only other move is to
//! `failed`. The state lives on the PlanningRecord so a run paused in
//! `awaiting_review` can be resumed after a restart.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::id::generate_id;
use super::record::OutputFormat;
use super::shopping::{GroceryCategory, ShoppingList};

/// Pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    #[default]
    Calculating,
    ResolvingIngredients,
    Aggregating,
    AwaitingReview,
    Delivering,
    Done,
    Failed,
}

impl PipelineStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn successor(&self) -> Option<PipelineStep> {
        match self {
            Self::Calculating => Some(Self::ResolvingIngredients),
            Self::ResolvingIngredients => Some(Self::Aggregating),
            Self::Aggregating => Some(Self::AwaitingReview),
            Self::AwaitingReview => Some(Self::Delivering),
            Self::Delivering => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calculating => "calculating",
            Self::ResolvingIngredients => "resolving_ingredients",
            Self::Aggregating => "aggregating",
            Self::AwaitingReview => "awaiting_review",
            Self::Delivering => "delivering",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invalid run bookkeeping operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunStateError {
    #[error("pipeline cannot move from {from} to {to}")]
    InvalidStep { from: PipelineStep, to: PipelineStep },

    #[error("the review decision was already made")]
    AlreadyDecided,
}

/// Scale factor computed for one dish during `calculating`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishScale {
    pub dish: String,
    /// Quantity-table category used
    pub category: String,
    pub multiplier: f64,
    pub reference_servings: u32,
    /// Category was unknown and the fallback portion was used
    pub estimated: bool,
}

/// Typed edit instruction applied while the run awaits review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewEdit {
    Exclude {
        item: String,
    },
    Include {
        item: String,
    },
    SetQuantity {
        item: String,
        quantity: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    Remove {
        item: String,
    },
    Add {
        name: String,
        quantity: f64,
        #[serde(default)]
        unit: String,
        #[serde(default)]
        category: GroceryCategory,
    },
    /// Natural-language correction handed to the list editor capability
    Freeform {
        instruction: String,
    },
}

/// The human approval, recorded once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub exclusions: BTreeSet<String>,
    pub decided_at: DateTime<Utc>,
}

/// Outcome of delivering to one format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub format: OutputFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Rendered body for formats that produce text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made for this format against the approved list
    #[serde(default)]
    pub attempts: u32,
}

impl DeliveryResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-destination delivery results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub results: Vec<DeliveryResult>,
}

impl DeliveryReport {
    pub fn get(&self, format: OutputFormat) -> Option<&DeliveryResult> {
        self.results.iter().find(|r| r.format == format)
    }

    pub fn successes(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|r| r.succeeded())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    pub fn is_partial(&self) -> bool {
        self.successes().next().is_some() && self.failures().next().is_some()
    }

    /// Replace the entry for a format, keeping order for existing formats
    pub fn upsert(&mut self, result: DeliveryResult) {
        match self.results.iter_mut().find(|r| r.format == result.format) {
            Some(existing) => *existing = result,
            None => self.results.push(result),
        }
    }

    /// User-facing summary naming each failed format and how to retry it
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for result in &self.results {
            if result.succeeded() {
                match &result.url {
                    Some(url) => lines.push(format!("{}: delivered ({})", result.format, url)),
                    None => lines.push(format!("{}: delivered", result.format)),
                }
            } else {
                lines.push(format!(
                    "{}: failed ({}). Ask to retry {} to try again.",
                    result.format,
                    result.error.as_deref().unwrap_or("unknown error"),
                    result.format
                ));
            }
        }
        lines.join("\n")
    }
}

/// Bookkeeping for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunState {
    pub run_id: String,
    pub step: PipelineStep,

    /// Dishes still being resolved
    #[serde(default)]
    pub pending_resolutions: BTreeSet<String>,

    #[serde(default)]
    pub scales: Vec<DishScale>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopping_list: Option<ShoppingList>,

    /// Edits applied during review, in order
    #[serde(default)]
    pub review_edits: Vec<ReviewEdit>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_decision: Option<ReviewDecision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentRunState {
    pub fn new(title: &str) -> Self {
        let now = Utc::now();
        let run_id = generate_id("run", title);
        debug!(%run_id, "AgentRunState::new: called");
        Self {
            run_id,
            step: PipelineStep::Calculating,
            pending_resolutions: BTreeSet::new(),
            scales: Vec::new(),
            shopping_list: None,
            review_edits: Vec::new(),
            review_decision: None,
            delivery: None,
            failure: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to the next step; skipping or going backward is rejected
    pub fn advance(&mut self, to: PipelineStep) -> Result<(), RunStateError> {
        debug!(run_id = %self.run_id, from = %self.step, %to, "AgentRunState::advance: called");
        if self.step.successor() != Some(to) {
            return Err(RunStateError::InvalidStep { from: self.step, to });
        }
        self.step = to;
        self.updated_at = Utc::now();
        if to.is_terminal() {
            self.finished_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Terminal failure from any non-terminal step
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), RunStateError> {
        if self.step.is_terminal() {
            return Err(RunStateError::InvalidStep {
                from: self.step,
                to: PipelineStep::Failed,
            });
        }
        let reason = reason.into();
        debug!(run_id = %self.run_id, %reason, "AgentRunState::fail: called");
        self.step = PipelineStep::Failed;
        self.failure = Some(reason);
        self.updated_at = Utc::now();
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Record the approval; allowed exactly once
    pub fn decide(&mut self, exclusions: BTreeSet<String>) -> Result<&ReviewDecision, RunStateError> {
        if self.review_decision.is_some() {
            return Err(RunStateError::AlreadyDecided);
        }
        Ok(self.review_decision.insert(ReviewDecision {
            exclusions,
            decided_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_advance_in_order() {
        let mut run = AgentRunState::new("party");
        run.advance(PipelineStep::ResolvingIngredients).unwrap();
        run.advance(PipelineStep::Aggregating).unwrap();
        run.advance(PipelineStep::AwaitingReview).unwrap();
        assert!(run.advance(PipelineStep::Calculating).is_err());
        assert!(run.advance(PipelineStep::Done).is_err());
        run.advance(PipelineStep::Delivering).unwrap();
        run.advance(PipelineStep::Done).unwrap();
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_fail_only_from_non_terminal() {
        let mut run = AgentRunState::new("party");
        run.fail("empty menu").unwrap();
        assert_eq!(run.step, PipelineStep::Failed);
        assert!(run.fail("again").is_err());
        assert!(run.advance(PipelineStep::ResolvingIngredients).is_err());
    }

    #[test]
    fn test_decision_set_once() {
        let mut run = AgentRunState::new("party");
        run.decide(BTreeSet::new()).unwrap();
        assert_eq!(run.decide(BTreeSet::new()).unwrap_err(), RunStateError::AlreadyDecided);
    }

    #[test]
    fn test_report_summary_names_failures() {
        let report = DeliveryReport {
            results: vec![
                DeliveryResult {
                    format: OutputFormat::GoogleTasks,
                    url: None,
                    rendered: None,
                    error: Some("service unavailable".to_string()),
                    attempts: 1,
                },
                DeliveryResult {
                    format: OutputFormat::InChat,
                    url: Some("chat://s1".to_string()),
                    rendered: Some("list".to_string()),
                    error: None,
                    attempts: 1,
                },
            ],
        };
        assert!(report.is_partial());
        let summary = report.summary();
        assert!(summary.contains("google_tasks: failed (service unavailable)"));
        assert!(summary.contains("retry google_tasks"));
        assert!(summary.contains("in_chat: delivered (chat://s1)"));
    }

    #[test]
    fn test_review_edit_tagged_json() {
        let edit: ReviewEdit = serde_json::from_str(r#"{"kind":"exclude","item":"onion"}"#).unwrap();
        assert_eq!(
            edit,
            ReviewEdit::Exclude {
                item: "onion".to_string()
            }
        );
    }
}
