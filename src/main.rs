use anyhow::{Context, Result};
use herdwatch::api::HttpHistoryClient;
use herdwatch::config::{load_config, HerdConfig};
use herdwatch::nats::{NatsTransport, PushChannelManager};
use herdwatch::state::{EngineConfig, ReconciliationEngine, ViewScope};
use herdwatch::EngineError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herdwatch=info".into()),
        )
        .init();

    info!("Herdwatch starting...");

    // Read configuration
    let config_path =
        std::env::var("HERDWATCH_CONFIG").unwrap_or_else(|_| "herdwatch.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        HerdConfig::default()
    };

    let scope = match std::env::var("HERDWATCH_FOCUS") {
        Ok(id) if !id.trim().is_empty() => ViewScope::Detail(id.trim().to_string()),
        _ => ViewScope::List,
    };

    info!(
        api_url = %config.api.base_url,
        push_url = %config.push.url,
        topic = %config.push.topic,
        window_capacity = config.window.capacity,
        scope = ?scope,
        "Configuration loaded"
    );

    // Initialize reconciliation engine
    let client = HttpHistoryClient::new(&config.api).context("Failed to create history client")?;
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::new(client),
        scope,
        EngineConfig::from(&config),
    ));

    // Initialize push channel; the handler is re-subscribed on every reconnect
    let transport = Arc::new(NatsTransport::new(config.push.url.clone()));
    let channel = PushChannelManager::new(transport, config.push.clone());
    channel
        .subscribe(config.push.topic.clone(), engine.live_handler())
        .await?;

    let connect_timeout = Duration::from_secs(config.push.connect_timeout_seconds);
    match tokio::time::timeout(connect_timeout, channel.connect()).await {
        Ok(Ok(())) => info!("Push channel connected"),
        Ok(Err(e)) => {
            error!(error = %e, "Push channel unavailable, continuing with snapshots only");
            engine.report_error(EngineError::from(e));
        }
        Err(_) => {
            error!(
                timeout_secs = config.push.connect_timeout_seconds,
                "Push channel connect timed out, continuing with snapshots only"
            );
            engine.report_error(EngineError::ConnectionFailed(format!(
                "connect timed out after {}s",
                config.push.connect_timeout_seconds
            )));
        }
    }

    // Display stub: log each change set and every surfaced error
    let mut changes = engine.subscribe_changes();
    let display_engine = Arc::clone(&engine);
    let display_handle = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change_set) => info!(
                    inserted = ?change_set.inserted,
                    updated = ?change_set.updated,
                    removed = ?change_set.removed,
                    entities = display_engine.entity_count(),
                    "Display updated"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Display lagged, re-reading entity list");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut engine_errors = engine.subscribe_errors();
    let error_handle = tokio::spawn(async move {
        loop {
            match engine_errors.recv().await {
                Ok(e) => warn!(error = %e, retryable = e.is_retryable(), "Shown to user"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Channel failures surface through the engine's error stream
    let mut channel_errors = channel.subscribe_errors();
    let forward_engine = Arc::clone(&engine);
    let forward_handle = tokio::spawn(async move {
        loop {
            match channel_errors.recv().await {
                Ok(e) => forward_engine.report_error(EngineError::from(e)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let refresh_handle = tokio::spawn(Arc::clone(&engine).run_refresh_loop());
    let metrics_handle = tokio::spawn(herdwatch::state::run_metrics_reporter(
        Arc::clone(&engine),
        config.metrics.report_interval_seconds,
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    channel.disconnect().await;
    refresh_handle.abort();
    metrics_handle.abort();
    forward_handle.abort();
    error_handle.abort();
    display_handle.abort();
    info!("Herdwatch stopped");

    Ok(())
}
