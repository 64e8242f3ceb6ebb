use std::sync::Arc;

use procura_agent::{
    AssistantBackend, AssistantError, EngineStores, QuoteWorkflow, WorkflowSettings,
};
use procura_channel::{ChannelBackend, ChannelError, MessageChannel, ReconnectPolicy};
use procura_core::config::{AppConfig, ConfigError, LoadOptions};
use procura_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub stores: EngineStores,
    pub channel: Arc<ChannelBackend>,
    pub workflow: Arc<QuoteWorkflow>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("message channel unavailable: {0}")]
    Channel(#[from] ChannelError),
    #[error("assistant unavailable: {0}")]
    Assistant(#[from] AssistantError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates, resolves the channel and assistant variants, pairs a live channel
/// and registers the correlator as the channel's inbound handler.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let channel = Arc::new(ChannelBackend::from_config(&config.channel)?);
    channel.pair_if_live(&ReconnectPolicy::from_config(&config.channel)).await?;
    info!(
        event_name = "system.bootstrap.channel_ready",
        mode = channel.mode().as_str(),
        "message channel ready"
    );

    let assistant = AssistantBackend::from_config(&config.assistant)?;
    info!(
        event_name = "system.bootstrap.assistant_ready",
        backend = assistant.kind().as_str(),
        "assistant ready"
    );

    let stores = EngineStores::sql(db_pool.clone());
    let workflow = Arc::new(QuoteWorkflow::new(
        WorkflowSettings::from(&config.engine),
        stores.clone(),
        Arc::new(assistant),
        channel.clone(),
    ));
    channel.listen(Arc::new(workflow.correlator())).await;
    info!(
        event_name = "system.bootstrap.correlator_registered",
        policy = config.engine.correlation_policy.as_str(),
        "inbound replies are correlated"
    );

    Ok(Application { config, db_pool, stores, channel, workflow })
}
