//! Scripted delivery backend for simulations and tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{Delivered, DeliveryBackend, DeliveryContext, DeliveryError};
use crate::domain::ShoppingList;

/// Succeeds with a fixed URL or fails with a fixed message
#[derive(Debug)]
pub struct ScriptedBackend {
    outcome: Result<String, String>,
    calls: AtomicUsize,
    last_item_count: AtomicUsize,
}

impl ScriptedBackend {
    pub fn succeeding(url: impl Into<String>) -> Self {
        Self {
            outcome: Ok(url.into()),
            calls: AtomicUsize::new(0),
            last_item_count: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            calls: AtomicUsize::new(0),
            last_item_count: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Item count of the most recently delivered list
    pub fn last_item_count(&self) -> usize {
        self.last_item_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryBackend for ScriptedBackend {
    async fn deliver(&self, list: &ShoppingList, ctx: &DeliveryContext) -> Result<Delivered, DeliveryError> {
        debug!(session_id = %ctx.session_id, "ScriptedBackend::deliver: called");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_item_count.store(list.item_count(), Ordering::SeqCst);
        match &self.outcome {
            Ok(url) => Ok(Delivered {
                url: Some(url.clone()),
                rendered: None,
            }),
            Err(message) => Err(DeliveryError::Backend(message.clone())),
        }
    }
}
