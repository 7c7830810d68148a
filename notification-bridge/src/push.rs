//! Push notification senders

use crate::{types::PushDelivery, types::PushMessage, Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends push notifications to device tokens
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Send one message.
    ///
    /// `Ok(None)` means push is not configured and nothing was sent.
    async fn send(&self, message: &PushMessage) -> Result<Option<PushDelivery>>;
}

/// Push sender used when no gateway is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPush;

#[async_trait]
impl PushSender for DisabledPush {
    async fn send(&self, message: &PushMessage) -> Result<Option<PushDelivery>> {
        debug!(title = %message.title, "Push disabled, dropping notification");
        Ok(None)
    }
}

/// HTTP push gateway configuration
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Gateway endpoint receiving `POST` JSON messages
    pub gateway_url: String,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8085/push".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayResponse {
    #[serde(default)]
    message_id: Option<String>,
}

/// Push sender that posts JSON to an HTTP gateway
pub struct HttpPushSender {
    client: reqwest::Client,
    config: PushConfig,
}

impl HttpPushSender {
    /// Create a new sender
    pub fn new(config: PushConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Gateway configuration
    pub fn config(&self) -> &PushConfig {
        &self.config
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, message: &PushMessage) -> Result<Option<PushDelivery>> {
        let response = self
            .client
            .post(&self.config.gateway_url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            warn!(status = %status, "Push gateway reports unregistered token");
            return Ok(Some(PushDelivery::InvalidToken));
        }
        if !status.is_success() {
            return Err(Error::Push(format!("gateway returned {}", status)));
        }

        let body: GatewayResponse = response.json().await.unwrap_or(GatewayResponse {
            message_id: None,
        });
        Ok(Some(PushDelivery::Delivered {
            message_id: body.message_id.unwrap_or_default(),
        }))
    }
}
