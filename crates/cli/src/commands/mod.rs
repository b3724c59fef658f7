pub mod config;
pub mod doctor;
pub mod escalate;
pub mod migrate;

use serde::Serialize;
use spendgate_core::config::{AppConfig, LoadOptions};
use spendgate_db::{connect_from_config, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome<'a> {
    command: &'a str,
    status: &'a str,
    error_class: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload =
            CommandOutcome { command, status: "ok", error_class: None, message: message.into() };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command,
            status: "error",
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }
}

fn serialize_payload(payload: &CommandOutcome<'_>) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"status\":\"error\",\"error_class\":\"serialization\",\
             \"message\":\"{}\"}}",
            payload.command,
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config and opens the pool inside a fresh current-thread runtime, then
/// runs `body`. Exit codes: 2 config, 3 runtime, 4 connectivity.
pub(crate) fn with_database<F, Fut>(command: &str, body: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: std::future::Future<Output = CommandResult>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(command, "db_connectivity", error.to_string(), 4);
            }
        };
        let result = body(config, pool.clone()).await;
        pool.close().await;
        result
    })
}
