//! Event types for planning activity
//!
//! These are the notifications pushed to the conversation layer:
//! - Stage changes of a planning record
//! - Pipeline step progress and per-dish resolution outcomes
//! - The review payload and delivery results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DeliveryReport, DeliveryResult, PipelineStep, ShoppingList, Stage};

/// Everything observable about a planning session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanEvent {
    /// The record moved to a new stage
    StageChanged { session_id: String, from: Stage, to: Stage },

    /// The pipeline entered a step
    PipelineStep {
        session_id: String,
        run_id: String,
        step: PipelineStep,
    },
    /// One dish finished resolving, successfully or not; `run_id` is unset
    /// when resolution happened during recipe confirmation
    ResolutionSettled {
        session_id: String,
        run_id: Option<String>,
        dish: String,
        resolved: bool,
        error: Option<String>,
    },
    /// The pipeline is suspended waiting for approval
    ReviewReady {
        session_id: String,
        run_id: String,
        shopping_list: ShoppingList,
        message: String,
    },
    /// One output format finished delivering
    DeliveryFinished {
        session_id: String,
        run_id: String,
        result: DeliveryResult,
    },
    RunCompleted {
        session_id: String,
        run_id: String,
        report: DeliveryReport,
    },
    RunFailed {
        session_id: String,
        run_id: String,
        reason: String,
    },

    Warning {
        session_id: String,
        context: String,
        message: String,
    },
    Error {
        session_id: String,
        context: String,
        message: String,
    },
    /// The session was removed or reset; no more events follow
    SessionClosed { session_id: String },
}

impl PlanEvent {
    pub fn session_id(&self) -> &str {
        match self {
            PlanEvent::StageChanged { session_id, .. }
            | PlanEvent::PipelineStep { session_id, .. }
            | PlanEvent::ResolutionSettled { session_id, .. }
            | PlanEvent::ReviewReady { session_id, .. }
            | PlanEvent::DeliveryFinished { session_id, .. }
            | PlanEvent::RunCompleted { session_id, .. }
            | PlanEvent::RunFailed { session_id, .. }
            | PlanEvent::Warning { session_id, .. }
            | PlanEvent::Error { session_id, .. }
            | PlanEvent::SessionClosed { session_id } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            PlanEvent::StageChanged { .. } => "StageChanged",
            PlanEvent::PipelineStep { .. } => "PipelineStep",
            PlanEvent::ResolutionSettled { .. } => "ResolutionSettled",
            PlanEvent::ReviewReady { .. } => "ReviewReady",
            PlanEvent::DeliveryFinished { .. } => "DeliveryFinished",
            PlanEvent::RunCompleted { .. } => "RunCompleted",
            PlanEvent::RunFailed { .. } => "RunFailed",
            PlanEvent::Warning { .. } => "Warning",
            PlanEvent::Error { .. } => "Error",
            PlanEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}

/// A timestamped event for the JSONL log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: PlanEvent,
}

impl EventLogEntry {
    pub fn new(event: PlanEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_session_id_and_type() {
        let event = PlanEvent::StageChanged {
            session_id: "s-1".to_string(),
            from: Stage::Gathering,
            to: Stage::RecipeConfirmation,
        };
        assert_eq!(event.session_id(), "s-1");
        assert_eq!(event.event_type(), "StageChanged");

        let closed = PlanEvent::SessionClosed {
            session_id: "s-2".to_string(),
        };
        assert_eq!(closed.session_id(), "s-2");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PlanEvent::PipelineStep {
            session_id: "s-1".to_string(),
            run_id: "run-1".to_string(),
            step: PipelineStep::AwaitingReview,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"PipelineStep\""));
        assert!(json.contains("awaiting_review"));
        let back: PlanEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_log_entry_uses_short_timestamp_key() {
        let entry = EventLogEntry::new(PlanEvent::SessionClosed {
            session_id: "s".to_string(),
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"ts\":"));
    }
}
