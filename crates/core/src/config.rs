use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "spendgate.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub escalation: EscalationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EscalationConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub batch_limit: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub escalation_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://spendgate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            escalation: EscalationConfig {
                enabled: true,
                scan_interval_secs: 300,
                batch_limit: 500,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(escalation) = patch.escalation {
            if let Some(enabled) = escalation.enabled {
                self.escalation.enabled = enabled;
            }
            if let Some(scan_interval_secs) = escalation.scan_interval_secs {
                self.escalation.scan_interval_secs = scan_interval_secs;
            }
            if let Some(batch_limit) = escalation.batch_limit {
                self.escalation.batch_limit = batch_limit;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SPENDGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SPENDGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SPENDGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SPENDGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SPENDGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SPENDGATE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SPENDGATE_SERVER_PORT") {
            self.server.port = parse_u16("SPENDGATE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SPENDGATE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("SPENDGATE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("SPENDGATE_ESCALATION_ENABLED") {
            self.escalation.enabled = parse_bool("SPENDGATE_ESCALATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("SPENDGATE_ESCALATION_SCAN_INTERVAL_SECS") {
            self.escalation.scan_interval_secs =
                parse_u64("SPENDGATE_ESCALATION_SCAN_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("SPENDGATE_ESCALATION_BATCH_LIMIT") {
            self.escalation.batch_limit = parse_u32("SPENDGATE_ESCALATION_BATCH_LIMIT", &value)?;
        }

        let log_level =
            read_env("SPENDGATE_LOGGING_LEVEL").or_else(|| read_env("SPENDGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SPENDGATE_LOGGING_FORMAT").or_else(|| read_env("SPENDGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.escalation_enabled {
            self.escalation.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_escalation(&self.escalation)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_escalation(escalation: &EscalationConfig) -> Result<(), ConfigError> {
    if !(1..=86_400).contains(&escalation.scan_interval_secs) {
        return Err(ConfigError::Validation(
            "escalation.scan_interval_secs must be in range 1..=86400".to_string(),
        ));
    }

    if escalation.batch_limit == 0 {
        return Err(ConfigError::Validation(
            "escalation.batch_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    escalation: Option<EscalationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    enabled: Option<bool>,
    scan_interval_secs: Option<u64>,
    batch_limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.escalation.enabled, "escalation loop should be on by default")?;
        ensure(config.escalation.scan_interval_secs == 300, "default scan interval is 300s")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SPENDGATE_DB_PATH", "/var/lib/spendgate/data.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("spendgate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_SPENDGATE_DB_PATH}"

[escalation]
scan_interval_secs = 60
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/spendgate/data.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.escalation.scan_interval_secs == 60,
                "scan interval should come from file",
            )
        })();

        clear_vars(&["TEST_SPENDGATE_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_SPENDGATE_UNSET"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("spendgate.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_SPENDGATE_UNSET}\"\n")
            .map_err(|err| err.to_string())?;

        let options = LoadOptions { config_path: Some(path), ..LoadOptions::default() };
        let error = match AppConfig::load(options) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_SPENDGATE_UNSET"
            ),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGATE_LOG_LEVEL", "warn");
        env::set_var("SPENDGATE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )
        })();

        clear_vars(&["SPENDGATE_LOG_LEVEL", "SPENDGATE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGATE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SPENDGATE_ESCALATION_BATCH_LIMIT", "50");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("spendgate.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[escalation]
batch_limit = 10
enabled = true

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    escalation_enabled: Some(false),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.escalation.batch_limit == 50, "env batch limit should win over file")?;
            ensure(!config.escalation.enabled, "override should disable the escalation loop")?;
            ensure(config.logging.level == "warn", "file log level should win over default")
        })();

        clear_vars(&["SPENDGATE_DATABASE_URL", "SPENDGATE_ESCALATION_BATCH_LIMIT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGATE_ESCALATION_SCAN_INTERVAL_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("scan_interval_secs")
            );
            ensure(has_message, "validation failure should mention scan_interval_secs")
        })();

        clear_vars(&["SPENDGATE_ESCALATION_SCAN_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn malformed_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SPENDGATE_SERVER_PORT", "eighty");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) if key == "SPENDGATE_SERVER_PORT" => {
                Ok(())
            }
            other => Err(format!("expected invalid override error, got {other:?}")),
        };

        clear_vars(&["SPENDGATE_SERVER_PORT"]);
        result
    }

    #[test]
    fn non_sqlite_database_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/spendgate".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });
        ensure(
            matches!(
                result,
                Err(ConfigError::Validation(ref message)) if message.contains("sqlite")
            ),
            "non-sqlite url should fail validation",
        )
    }
}
