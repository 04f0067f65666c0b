//! Session error types

use thiserror::Error;

use crate::domain::Stage;
use crate::pipeline::PipelineError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("ambiguous session reference '{reference}', matches: {}", candidates.join(", "))]
    Ambiguous { reference: String, candidates: Vec<String> },

    #[error("output formats can only be chosen in {expected}, session is in {actual}")]
    WrongStage { expected: Stage, actual: Stage },

    #[error("select at least one output format")]
    NoFormats,

    #[error("the session was cancelled")]
    Cancelled,

    #[error("session store: {0}")]
    Store(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<eyre::Report> for SessionError {
    fn from(report: eyre::Report) -> Self {
        SessionError::Store(format!("{:#}", report))
    }
}
