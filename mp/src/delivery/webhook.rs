//! HTTP webhook delivery
//!
//! POSTs the list as JSON to a configured URL. The service answers with a
//! JSON body whose `url` field points at the created sheet or task list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Delivered, DeliveryBackend, DeliveryContext, DeliveryError};
use crate::domain::{OutputFormat, ShoppingList};

#[derive(Debug, Serialize)]
struct WebhookRequest<'a> {
    format: OutputFormat,
    title: &'a str,
    session_id: &'a str,
    shopping_list: &'a ShoppingList,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    url: Option<String>,
}

pub struct WebhookBackend {
    format: OutputFormat,
    url: String,
    http: Client,
}

impl WebhookBackend {
    pub fn new(format: OutputFormat, url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let url = url.into();
        debug!(%format, %url, "WebhookBackend::new: called");
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { format, url, http })
    }
}

#[async_trait]
impl DeliveryBackend for WebhookBackend {
    async fn deliver(&self, list: &ShoppingList, ctx: &DeliveryContext) -> Result<Delivered, DeliveryError> {
        debug!(format = %self.format, url = %self.url, "WebhookBackend::deliver: called");
        let body = WebhookRequest {
            format: self.format,
            title: &ctx.title,
            session_id: &ctx.session_id,
            shopping_list: list,
        };

        let response = self
            .http
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            debug!(%status, "WebhookBackend::deliver: service rejected the list");
            return Err(DeliveryError::Rejected { status, message });
        }

        let parsed: WebhookResponse = response.json().await?;
        info!(format = %self.format, url = ?parsed.url, "WebhookBackend::deliver: delivered");
        Ok(Delivered {
            url: parsed.url,
            rendered: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let list = ShoppingList::new();
        let body = WebhookRequest {
            format: OutputFormat::GoogleTasks,
            title: "Party Shopping - 03-15-2026",
            session_id: "s-1",
            shopping_list: &list,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"], "google_tasks");
        assert_eq!(json["title"], "Party Shopping - 03-15-2026");
        assert!(json["shopping_list"]["groups"].is_array());
    }

    #[test]
    fn test_response_url_is_optional() {
        let parsed: WebhookResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.url.is_none());
        let parsed: WebhookResponse = serde_json::from_str(r#"{"url":"https://x.test/1"}"#).unwrap();
        assert_eq!(parsed.url.as_deref(), Some("https://x.test/1"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        let backend = WebhookBackend::new(
            OutputFormat::GoogleSheet,
            "http://127.0.0.1:9/unreachable",
            Duration::from_millis(200),
        )
        .unwrap();
        let ctx = DeliveryContext {
            title: "t".to_string(),
            session_id: "s".to_string(),
        };
        let result = backend.deliver(&ShoppingList::new(), &ctx).await;
        assert!(matches!(result, Err(DeliveryError::Network(_))));
    }
}
