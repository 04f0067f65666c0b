//! Sessions - per-conversation planning state
//!
//! A [`Session`] owns one planning record and runs turns against it. The
//! [`SessionRegistry`] keeps live sessions by id, and the [`SessionStore`]
//! persists them as JSON so a session can resume after a restart.

mod error;
mod handle;
mod registry;
mod store;

pub use error::SessionError;
pub use handle::{Session, SessionDeps, TurnOutcome};
pub use registry::{SessionRegistry, resolve_reference};
pub use store::{SessionStore, SessionSummary};
