//! In-chat delivery: the list rendered as markdown

use async_trait::async_trait;
use tracing::debug;

use super::{Delivered, DeliveryBackend, DeliveryContext, DeliveryError};
use crate::domain::ShoppingList;
use crate::render::Renderer;

#[derive(Default)]
pub struct InChatBackend {
    renderer: Renderer,
}

impl InChatBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryBackend for InChatBackend {
    async fn deliver(&self, list: &ShoppingList, ctx: &DeliveryContext) -> Result<Delivered, DeliveryError> {
        debug!(session_id = %ctx.session_id, items = list.item_count(), "InChatBackend::deliver: called");
        let rendered = self
            .renderer
            .shopping_list(&ctx.title, list)
            .map_err(|e| DeliveryError::Render(e.to_string()))?;
        Ok(Delivered {
            url: None,
            rendered: Some(rendered),
        })
    }
}
