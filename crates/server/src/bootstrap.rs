use std::sync::Arc;

use spendgate_core::config::{AppConfig, ConfigError, LoadOptions};
use spendgate_core::{ApprovalRequestManager, EscalationScheduler, SettingsAdmin};
use spendgate_db::{
    connect_from_config, migrations, DbPool, SqlApprovalStore, SqlCommerceReader, SqlPolicyStore,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub manager: Arc<ApprovalRequestManager>,
    pub admin: Arc<SettingsAdmin>,
    pub scheduler: Arc<EscalationScheduler>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let approvals = Arc::new(SqlApprovalStore::new(db_pool.clone()));
    let policies = Arc::new(SqlPolicyStore::new(db_pool.clone()));
    let commerce = Arc::new(SqlCommerceReader::new(db_pool.clone()));

    let manager = ApprovalRequestManager::new(approvals.clone(), policies.clone(), commerce);
    let scheduler = EscalationScheduler::new(approvals, policies.clone())
        .with_batch_limit(config.escalation.batch_limit);
    let admin = SettingsAdmin::new(policies);

    Ok(Application {
        config,
        db_pool,
        manager: Arc::new(manager),
        admin: Arc::new(admin),
        scheduler: Arc::new(scheduler),
    })
}
