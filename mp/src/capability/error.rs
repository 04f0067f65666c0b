//! Capability error types

use std::time::Duration;

use thiserror::Error;

/// Failure of an opaque external capability call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Nothing structured in the input; callers treat this as an empty result
    #[error("No structured data found")]
    NoData,

    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Malformed output: {0}")]
    Malformed(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl CapabilityError {
    /// Check if this error is worth retrying at the call site
    pub fn is_retryable(&self) -> bool {
        match self {
            CapabilityError::Unavailable(_) => true,
            CapabilityError::Timeout(_) => true,
            CapabilityError::NoData => false,
            CapabilityError::Malformed(_) => false,
            CapabilityError::Rejected(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CapabilityError::Unavailable("503".to_string()).is_retryable());
        assert!(CapabilityError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!CapabilityError::NoData.is_retryable());
        assert!(!CapabilityError::Malformed("not json".to_string()).is_retryable());
    }
}
