//! Planning pipeline: scale, resolve, aggregate, review, deliver

mod aggregate;
mod error;
mod runner;

pub use aggregate::{aggregate, compute_scales, is_never_purchased};
pub use error::PipelineError;
pub use runner::{AgentPipeline, RunContext, apply_edit};
