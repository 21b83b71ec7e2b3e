//! Delivery to recipients through a messaging webhook

use async_trait::async_trait;
use delivery_coordinator::{DeliveryTransport, Notice, TransportError};
use reqwest::Client;
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Posts artifacts and status notices to the messaging gateway.
pub struct WebhookTransport {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct NoticePayload<'a> {
    message: String,
    #[serde(flatten)]
    notice: &'a Notice,
}

impl WebhookTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn recipient_url(&self, recipient: &str, endpoint: &str) -> String {
        format!(
            "{}/recipients/{}/{}",
            self.base_url,
            urlencoding::encode(recipient),
            endpoint
        )
    }

    async fn check(response: reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Gateway rejected request");
        Err(TransportError::Rejected(format!("gateway returned status {}", status)))
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    TransportError::Rejected(err.to_string())
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    async fn deliver(
        &self,
        recipient: &str,
        artifact: &Path,
        caption: &str,
    ) -> Result<(), TransportError> {
        let data = fs::read(artifact).await?;
        let url = format!(
            "{}?caption={}",
            self.recipient_url(recipient, "items"),
            urlencoding::encode(caption)
        );
        debug!(url = %url, size = data.len(), "Delivering item");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(response).await
    }

    async fn notify(&self, recipient: &str, notice: &Notice) -> Result<(), TransportError> {
        let url = self.recipient_url(recipient, "notices");
        let payload = NoticePayload {
            message: notice.message(),
            notice,
        };

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(response).await
    }
}
