mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use procura_channel::MessageChannel;
use procura_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use procura_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits its milestones.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    let routes = api::router(api::ApiState {
        workflow: app.workflow.clone(),
        stores: app.stores.clone(),
        channel: app.channel.clone(),
    })
    .merge(health::router(app.db_pool.clone(), app.channel.clone()));

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        channel_mode = app.channel.mode().as_str(),
        "procura-server listening"
    );
    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "procura-server stopping");
    if let Err(error) = app.channel.close().await {
        tracing::warn!(event_name = "system.server.channel_close_failed", error = %error, "channel close failed");
    }
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            grace_secs = grace.as_secs(),
            "database pool did not close in time"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(event_name = "system.server.signal_error", error = %error, "ctrl-c handler failed");
    }
}
