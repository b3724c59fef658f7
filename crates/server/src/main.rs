mod api;
mod bootstrap;
mod escalation;
mod health;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use spendgate_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use spendgate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner = escalation::spawn(&app.config.escalation, app.scheduler.clone(), shutdown_rx);

    let api_state = api::ApiState { manager: app.manager.clone(), admin: app.admin.clone() };
    let routes = api::router(api_state)
        .merge(health::router(health::HealthState::new(
            app.db_pool.clone(),
            app.config.escalation.enabled,
        )));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "spendgate-server started"
    );

    axum::serve(listener, routes.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "spendgate-server stopping"
    );

    let _ = shutdown_tx.send(true);
    if let Some(handle) = scanner {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!(
                event_name = "escalation.scanner.shutdown_timeout",
                correlation_id = "shutdown",
                "escalation scanner did not stop within the grace period"
            );
        }
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
