//! Event Bus - pub/sub for planning events
//!
//! A tokio broadcast channel. Sessions and pipelines emit, the conversation
//! layer and the JSONL logger subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::PlanEvent;
use crate::domain::{DeliveryReport, DeliveryResult, PipelineStep, ShoppingList, Stage};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus shared by every session
pub struct EventBus {
    tx: broadcast::Sender<PlanEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Fire-and-forget; dropped when nobody is subscribed
    pub fn emit(&self, event: PlanEvent) {
        debug!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            "EventBus::emit"
        );
        let _ = self.tx.send(event);
    }

    /// Receives every event emitted after subscription
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Emitter bound to one session
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        let session_id = session_id.into();
        debug!(%session_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            session_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone handle that stamps the session id onto every event
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PlanEvent>,
    session_id: String,
}

impl EventEmitter {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&self, event: PlanEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn stage_changed(&self, from: Stage, to: Stage) {
        self.emit(PlanEvent::StageChanged {
            session_id: self.session_id.clone(),
            from,
            to,
        });
    }

    pub fn pipeline_step(&self, run_id: &str, step: PipelineStep) {
        self.emit(PlanEvent::PipelineStep {
            session_id: self.session_id.clone(),
            run_id: run_id.to_string(),
            step,
        });
    }

    pub fn resolution_settled(&self, run_id: Option<&str>, dish: &str, error: Option<String>) {
        self.emit(PlanEvent::ResolutionSettled {
            session_id: self.session_id.clone(),
            run_id: run_id.map(str::to_string),
            dish: dish.to_string(),
            resolved: error.is_none(),
            error,
        });
    }

    pub fn review_ready(&self, run_id: &str, shopping_list: &ShoppingList, message: &str) {
        self.emit(PlanEvent::ReviewReady {
            session_id: self.session_id.clone(),
            run_id: run_id.to_string(),
            shopping_list: shopping_list.clone(),
            message: message.to_string(),
        });
    }

    pub fn delivery_finished(&self, run_id: &str, result: &DeliveryResult) {
        self.emit(PlanEvent::DeliveryFinished {
            session_id: self.session_id.clone(),
            run_id: run_id.to_string(),
            result: result.clone(),
        });
    }

    pub fn run_completed(&self, run_id: &str, report: &DeliveryReport) {
        self.emit(PlanEvent::RunCompleted {
            session_id: self.session_id.clone(),
            run_id: run_id.to_string(),
            report: report.clone(),
        });
    }

    pub fn run_failed(&self, run_id: &str, reason: &str) {
        self.emit(PlanEvent::RunFailed {
            session_id: self.session_id.clone(),
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn warning(&self, context: &str, message: &str) {
        self.emit(PlanEvent::Warning {
            session_id: self.session_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }

    pub fn error(&self, context: &str, message: &str) {
        self.emit(PlanEvent::Error {
            session_id: self.session_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }

    pub fn session_closed(&self) {
        self.emit(PlanEvent::SessionClosed {
            session_id: self.session_id.clone(),
        });
    }
}

/// Shared bus with default capacity
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
