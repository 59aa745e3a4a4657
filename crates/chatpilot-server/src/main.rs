//! ChatPilot - engine entry point

use anyhow::Result;
use chatpilot_common::config::{Config, LoggingConfig};
use chatpilot_core::{ChatClient, Engine, HttpChatClient};
use chatpilot_storage::create_storage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    init_logging(&config.logging);

    info!("Starting ChatPilot engine...");

    // Initialize file storage
    let storage = create_storage(&config.storage)?;
    info!(path = %config.storage.data_dir.display(), "Storage ready");

    // Connect to the automation sidecar
    let client: Arc<dyn ChatClient> = Arc::new(HttpChatClient::new(&config.automation)?);
    info!(endpoint = %config.automation.endpoint, "Automation bridge configured");

    let (engine, handle) = Engine::build(config, client, storage).await?;

    let engine_handle = tokio::spawn(engine.run());

    info!("ChatPilot engine started");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    if let Err(e) = engine_handle.await {
        error!("Engine task failed: {}", e);
    }

    info!("ChatPilot shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},chatpilot=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
