//! NATS-backed real-time channel
//!
//! Events are published as JSON to `{prefix}.{room}.{event}`, e.g.
//! `allocations.company-42.allocation-completed`. Gateways bridging to
//! browser sockets subscribe to `{prefix}.company-42.>`.

use crate::{
    metrics::REALTIME_PUBLISH_DURATION,
    realtime::RealtimeChannel,
    types::{RealtimeEvent, Room},
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// NATS channel configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,

    /// Subject prefix
    pub subject_prefix: String,

    /// Per-attempt publish timeout
    pub publish_timeout: Duration,

    /// Max attempts per event
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "allocations".to_string(),
            publish_timeout: Duration::from_secs(5),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Real-time channel publishing to NATS core subjects
pub struct NatsRealtime {
    client: async_nats::Client,
    config: NatsConfig,
}

impl NatsRealtime {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Subject an event is published on
    pub fn subject_for(&self, room: &Room, event: &RealtimeEvent) -> String {
        subject_for(&self.config.subject_prefix, room, event)
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, subject: &str, payload: Bytes) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self.publish_once(subject, payload.clone()).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(subject, attempts, "Event published after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(subject, attempts, error = %e, "Failed to publish event");
                        return Err(e);
                    }

                    warn!(
                        subject,
                        attempts,
                        error = %e,
                        "Publish failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;

                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }

    async fn publish_once(&self, subject: &str, payload: Bytes) -> Result<()> {
        let timeout = self.config.publish_timeout;
        let publish = async {
            self.client
                .publish(subject.to_string(), payload)
                .await
                .map_err(|e| Error::Publish(e.to_string()))?;
            self.client
                .flush()
                .await
                .map_err(|e| Error::Publish(format!("Flush failed: {}", e)))
        };

        tokio::time::timeout(timeout, publish)
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
    }
}

#[async_trait]
impl RealtimeChannel for NatsRealtime {
    async fn emit(&self, room: &Room, event: &RealtimeEvent) -> Result<()> {
        let start = Instant::now();
        let subject = self.subject_for(room, event);
        let payload = Bytes::from(event.to_bytes()?);

        let result = self.publish_with_retry(&subject, payload).await;
        REALTIME_PUBLISH_DURATION.observe(start.elapsed().as_secs_f64());
        result
    }
}

/// Build `{prefix}.{room}.{event}`
pub fn subject_for(prefix: &str, room: &Room, event: &RealtimeEvent) -> String {
    format!(
        "{}.{}.{}",
        sanitize_token(prefix),
        sanitize_token(&room.name()),
        event.name.as_str()
    )
}

/// Replace characters NATS treats specially inside one subject token
fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' => '_',
            other => other,
        })
        .collect()
}
