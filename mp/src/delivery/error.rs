//! Delivery error types

use std::time::Duration;
use thiserror::Error;

use crate::domain::OutputFormat;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no backend configured for {0}")]
    NoBackend(OutputFormat),

    #[error("{0} was already attempted for this list")]
    AlreadyAttempted(OutputFormat),

    #[error("{0} was never attempted, nothing to retry")]
    NotAttempted(OutputFormat),

    #[error("{0} was already delivered")]
    AlreadyDelivered(OutputFormat),

    #[error("service returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not render the list: {0}")]
    Render(String),

    #[error("backend failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_format() {
        assert_eq!(
            DeliveryError::NoBackend(OutputFormat::GoogleSheet).to_string(),
            "no backend configured for google_sheet"
        );
        let rejected = DeliveryError::Rejected {
            status: 503,
            message: "maintenance".to_string(),
        };
        assert_eq!(rejected.to_string(), "service returned 503: maintenance");
    }
}
