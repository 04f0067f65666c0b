//! Bounded retry with exponential backoff around capability calls

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::CapabilityError;
use crate::config::PipelineConfig;

/// Per-call timeout and retry bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt with the given timeout
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.capability_timeout_ms),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// Run `op` with a timeout per attempt, retrying retryable errors
///
/// Non-retryable errors return immediately. Exhausted retries return the
/// last error.
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    debug!(%label, max_retries = policy.max_retries, "call_with_retry: called");
    let mut last_error = None;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                %label,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "call_with_retry: retrying after transient error"
            );
            tokio::time::sleep(backoff).await;
        }

        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%label, attempt, "call_with_retry: attempt timed out");
                Err(CapabilityError::Timeout(policy.timeout))
            }
        };

        match result {
            Ok(value) => {
                debug!(%label, attempt, "call_with_retry: success");
                return Ok(value);
            }
            Err(e) if e.is_retryable() => {
                debug!(%label, attempt, error = %e, "call_with_retry: retryable error");
                last_error = Some(e);
            }
            Err(e) => {
                debug!(%label, attempt, error = %e, "call_with_retry: non-retryable error");
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| CapabilityError::Unavailable("max retries exceeded".to_string())))
}
