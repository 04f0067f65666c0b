//! Push-based notifications for the conversation layer
//!
//! Sessions and pipelines emit [`PlanEvent`]s onto a shared broadcast bus.
//! The conversation layer subscribes to drive its next prompt; the
//! [`EventLogger`] persists every event as JSONL per session.
//!
//! ```rust,ignore
//! let bus = create_event_bus();
//! let emitter = bus.emitter_for("session-123");
//! emitter.stage_changed(Stage::Gathering, Stage::RecipeConfirmation);
//!
//! let mut rx = bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_session_events, spawn_event_logger};
pub use types::{EventLogEntry, PlanEvent};
