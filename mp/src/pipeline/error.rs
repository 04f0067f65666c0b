//! Pipeline error types

use thiserror::Error;

use crate::capability::CapabilityError;
use crate::delivery::DeliveryError;
use crate::domain::{PipelineStep, RunStateError, Stage, StageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already active for this session")]
    RunInProgress,

    #[error("pipeline needs stage {expected}, record is in {actual}")]
    WrongStage { expected: Stage, actual: Stage },

    /// The run was entered with an unusable record; it is now failed
    #[error("cannot plan quantities: {0}")]
    Precondition(String),

    #[error("no pipeline run exists for this session")]
    NoRun,

    #[error("the run is {0}, not awaiting review")]
    NotAwaitingReview(PipelineStep),

    #[error("the run is {0}; deliveries can only be retried once it is done")]
    NotDelivered(PipelineStep),

    #[error("no item named '{0}' on the shopping list")]
    UnknownItem(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("could not interpret the correction: {0}")]
    Editor(#[from] CapabilityError),

    #[error(transparent)]
    RunState(#[from] RunStateError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("the session was cancelled")]
    Cancelled,
}
