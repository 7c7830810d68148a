//! Allocation jobs binary
//!
//! Opens the allocation store and wallet ledger, wires push and real-time
//! delivery, and runs the periodic allocation checks until Ctrl-C.

use allocation_engine::{AllocationEngine, AllocationJobs, Config};
use anyhow::Context;
use notification_bridge::{
    DisabledPush, HttpPushSender, InMemoryRealtime, NatsConfig, NatsRealtime, Notifier,
    PushConfig, PushSender, RealtimeChannel,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        ledger_dir = ?config.ledger.data_dir,
        "Starting allocation jobs"
    );

    let notifier = build_notifier(&config).await?;
    let engine = Arc::new(
        AllocationEngine::open(config, notifier)
            .await
            .context("opening allocation engine")?,
    );

    let jobs = AllocationJobs::new(engine.clone()).start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    jobs.shutdown().await;
    if let Ok(engine) = Arc::try_unwrap(engine) {
        engine.shutdown().await?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn build_notifier(config: &Config) -> anyhow::Result<Notifier> {
    let notifications = &config.notifications;

    let push: Arc<dyn PushSender> = match &notifications.push_gateway_url {
        Some(url) => {
            tracing::info!(gateway = %url, "Push notifications enabled");
            Arc::new(HttpPushSender::new(PushConfig {
                gateway_url: url.clone(),
                timeout: Duration::from_millis(notifications.push_timeout_ms),
            })?)
        }
        None => {
            tracing::warn!("No push gateway configured, push notifications disabled");
            Arc::new(DisabledPush)
        }
    };

    let realtime: Arc<dyn RealtimeChannel> = match &notifications.nats_url {
        Some(url) => {
            let nats_config = NatsConfig {
                url: url.clone(),
                subject_prefix: notifications.subject_prefix.clone(),
                ..Default::default()
            };
            match NatsRealtime::connect(nats_config).await {
                Ok(channel) => Arc::new(channel),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "NATS unavailable, real-time events stay in process"
                    );
                    Arc::new(InMemoryRealtime::default())
                }
            }
        }
        None => Arc::new(InMemoryRealtime::default()),
    };

    Ok(Notifier::new(push, realtime))
}
