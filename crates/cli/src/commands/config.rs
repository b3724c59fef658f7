use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use spendgate_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

use crate::commands::CommandResult;

/// `(key path, primary env var, legacy alias)`.
const FIELDS: &[(&str, &str, Option<&str>)] = &[
    ("database.url", "SPENDGATE_DATABASE_URL", None),
    ("database.max_connections", "SPENDGATE_DATABASE_MAX_CONNECTIONS", None),
    ("database.timeout_secs", "SPENDGATE_DATABASE_TIMEOUT_SECS", None),
    ("server.bind_address", "SPENDGATE_SERVER_BIND_ADDRESS", None),
    ("server.port", "SPENDGATE_SERVER_PORT", None),
    ("server.graceful_shutdown_secs", "SPENDGATE_SERVER_GRACEFUL_SHUTDOWN_SECS", None),
    ("escalation.enabled", "SPENDGATE_ESCALATION_ENABLED", None),
    ("escalation.scan_interval_secs", "SPENDGATE_ESCALATION_SCAN_INTERVAL_SECS", None),
    ("escalation.batch_limit", "SPENDGATE_ESCALATION_BATCH_LIMIT", None),
    ("logging.level", "SPENDGATE_LOGGING_LEVEL", Some("SPENDGATE_LOG_LEVEL")),
    ("logging.format", "SPENDGATE_LOGGING_FORMAT", Some("SPENDGATE_LOG_FORMAT")),
];

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default)".to_string()];
    for (key_path, env_key, alias) in FIELDS {
        let value = effective_value(&config, key_path);
        let source = field_source(
            key_path,
            &[Some(*env_key), *alias],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &redact_url(key_path, &value), source));
    }

    CommandResult::success("config", lines.join("; "))
}

fn effective_value(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind_address" => config.server.bind_address.clone(),
        "server.port" => config.server.port.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "escalation.enabled" => config.escalation.enabled.to_string(),
        "escalation.scan_interval_secs" => config.escalation.scan_interval_secs.to_string(),
        "escalation.batch_limit" => config.escalation.batch_limit.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format).to_ascii_lowercase(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = Path::new("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[Option<&str>],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().flatten().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("{key} = {value} (source: {source})")
}

/// Elides query parameters on the database URL.
fn redact_url(key_path: &str, value: &str) -> String {
    if key_path != "database.url" {
        return value.to_string();
    }
    match value.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => value.to_string(),
    }
}
