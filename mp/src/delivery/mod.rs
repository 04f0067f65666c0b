//! DeliveryRouter - hands the approved list to each selected output format
//!
//! Every format is an independent backend. Formats are delivered
//! concurrently and the attempt ledger (the run's [`DeliveryReport`]) allows
//! one attempt per format per approved list. A failed format is only tried
//! again through [`DeliveryRouter::retry`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

mod error;
mod in_chat;
pub mod scripted;
mod webhook;

pub use error::DeliveryError;
pub use in_chat::InChatBackend;
pub use scripted::ScriptedBackend;
pub use webhook::WebhookBackend;

use crate::config::DeliveryConfig;
use crate::domain::{DeliveryReport, DeliveryResult, OutputFormat, ShoppingList};

/// Where and under what name a list is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    pub title: String,
    pub session_id: String,
}

/// What a backend produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivered {
    pub url: Option<String>,
    pub rendered: Option<String>,
}

/// One output destination
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn deliver(&self, list: &ShoppingList, ctx: &DeliveryContext) -> Result<Delivered, DeliveryError>;
}

#[derive(Clone)]
pub struct DeliveryRouter {
    backends: HashMap<OutputFormat, Arc<dyn DeliveryBackend>>,
    timeout: Duration,
}

impl DeliveryRouter {
    /// Router without any backends
    pub fn new(timeout: Duration) -> Self {
        Self {
            backends: HashMap::new(),
            timeout,
        }
    }

    /// In-chat always; webhook backends for every configured format
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        debug!(webhooks = config.webhooks.len(), "DeliveryRouter::from_config: called");
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut router = Self::new(timeout).with_backend(OutputFormat::InChat, Arc::new(InChatBackend::new()));
        for (format, url) in &config.webhooks {
            let backend = WebhookBackend::new(*format, url.clone(), timeout)?;
            router = router.with_backend(*format, Arc::new(backend));
        }
        Ok(router)
    }

    pub fn with_backend(mut self, format: OutputFormat, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.backends.insert(format, backend);
        self
    }

    pub fn supports(&self, format: OutputFormat) -> bool {
        self.backends.contains_key(&format)
    }

    /// Exactly one attempt against one format
    async fn attempt(
        &self,
        list: &ShoppingList,
        format: OutputFormat,
        ctx: &DeliveryContext,
        attempts: u32,
    ) -> DeliveryResult {
        debug!(%format, attempts, "DeliveryRouter::attempt: called");
        let outcome = match self.backends.get(&format) {
            None => Err(DeliveryError::NoBackend(format)),
            Some(backend) => match tokio::time::timeout(self.timeout, backend.deliver(list, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.timeout)),
            },
        };

        match outcome {
            Ok(delivered) => {
                info!(%format, url = ?delivered.url, "DeliveryRouter: delivered");
                DeliveryResult {
                    format,
                    url: delivered.url,
                    rendered: delivered.rendered,
                    error: None,
                    attempts,
                }
            }
            Err(e) => {
                warn!(%format, error = %e, "DeliveryRouter: delivery failed");
                DeliveryResult {
                    format,
                    url: None,
                    rendered: None,
                    error: Some(e.to_string()),
                    attempts,
                }
            }
        }
    }

    /// Deliver to every format not yet in the ledger, concurrently
    ///
    /// Formats already attempted are skipped. Returns the results of this
    /// call; the ledger holds every result so far.
    pub async fn deliver_all(
        &self,
        list: &ShoppingList,
        formats: &BTreeSet<OutputFormat>,
        ctx: &DeliveryContext,
        ledger: &mut DeliveryReport,
    ) -> Vec<DeliveryResult> {
        debug!(session_id = %ctx.session_id, formats = formats.len(), "deliver_all: called");
        let pending: Vec<OutputFormat> = formats
            .iter()
            .copied()
            .filter(|format| {
                let seen = ledger.get(*format).is_some();
                if seen {
                    debug!(%format, "deliver_all: already attempted, skipping");
                }
                !seen
            })
            .collect();

        let results = join_all(pending.into_iter().map(|format| self.attempt(list, format, ctx, 1))).await;
        for result in &results {
            ledger.upsert(result.clone());
        }
        results
    }

    /// Explicit user re-trigger of one failed format
    pub async fn retry(
        &self,
        list: &ShoppingList,
        format: OutputFormat,
        ctx: &DeliveryContext,
        ledger: &mut DeliveryReport,
    ) -> Result<DeliveryResult, DeliveryError> {
        debug!(%format, "retry: called");
        let attempts = match ledger.get(format) {
            None => return Err(DeliveryError::NotAttempted(format)),
            Some(previous) if previous.succeeded() => return Err(DeliveryError::AlreadyDelivered(format)),
            Some(previous) => previous.attempts + 1,
        };
        let result = self.attempt(list, format, ctx, attempts).await;
        ledger.upsert(result.clone());
        Ok(result)
    }
}
