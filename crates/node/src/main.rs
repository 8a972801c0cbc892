//! Gateway node binary
//!
//! Reads its configuration from `GATEWAY_*` environment variables, runs the
//! node in the configured role and logs every event as JSON until Ctrl-C.

use anyhow::Context;
use gateway_core::GatewayConfig;
use gateway_node::GatewayRuntime;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gateway_node=debug,gateway_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env().context("Failed to read gateway configuration")?;
    tracing::info!(
        "Gateway {} configured as {}",
        config.gateway_id,
        config.role
    );

    let runtime = GatewayRuntime::new(config).context("Invalid gateway configuration")?;

    let mut events = runtime.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "gateway_node::events", "{}", json),
                    Err(e) => tracing::warn!("Failed to serialize {} event: {}", event.name(), e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    runtime.start().await.context("Failed to start gateway")?;
    if let Some(addr) = runtime.management_addr().await {
        tracing::info!("Management endpoint: ws://{}", addr);
    }
    if let Some(addr) = runtime.application_addr().await {
        tracing::info!("Status API: http://{}/api/status", addr);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    runtime.stop().await;
    event_log.abort();
    Ok(())
}
