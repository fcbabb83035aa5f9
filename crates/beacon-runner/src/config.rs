//! Runner configuration loading from file and environment variables.

use beacon_db::DbRuntimeSettings;
use beacon_listener::ListenerSettings;
use beacon_types::{ListenerIdentity, RetrySchedule};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level runner configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Who this listener is and which services it talks to.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Shape of the GraphQL query against the data source.
    #[serde(default)]
    pub source: SourceConfig,

    /// Where handled events are posted.
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Event store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Optional fault telemetry.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Loop intervals and retry bands.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Instance name, e.g. "sale-listener". Required.
    #[serde(default)]
    pub instance_name: String,

    /// Deployment environment tag.
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Base URL of the API the webhook handler posts to.
    #[serde(default)]
    pub api_url: String,

    /// GraphQL endpoint of the block indexer.
    #[serde(default)]
    pub graph_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Root query field, e.g. "buyEntities".
    #[serde(default = "default_entity")]
    pub entity: String,

    /// Extra fields selected besides `id`, `blockNumber` and `transactionHash`.
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerConfig {
    /// Path joined onto `listener.api_url`.
    #[serde(default = "default_handler_path")]
    pub path: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Ingest endpoint for fault reports. Reporting is disabled when unset.
    #[serde(default)]
    pub dsn: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Pause before the poll loop reconnects after a fault.
    #[serde(default = "default_restart_pause_secs")]
    pub restart_pause_secs: u64,

    /// Retry bands; validated on load.
    #[serde(default)]
    pub bands: RetrySchedule,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "beacon_listener=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_entity() -> String {
    "events".to_string()
}

fn default_handler_path() -> String {
    "/events".to_string()
}

fn default_db_path() -> String {
    "beacon.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retry_interval_secs() -> u64 {
    75
}

fn default_restart_pause_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            environment: default_environment(),
            api_url: String::new(),
            graph_url: String::new(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            entity: default_entity(),
            fields: Vec::new(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            path: default_handler_path(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            restart_pause_secs: default_restart_pause_secs(),
            bands: RetrySchedule::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn identity(&self) -> ListenerIdentity {
        ListenerIdentity::new(&self.listener.instance_name, &self.listener.environment)
    }

    pub fn db_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
            ..DbRuntimeSettings::default()
        }
    }

    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            poll_interval: Duration::from_secs(self.schedule.poll_interval_secs),
            retry_interval: Duration::from_secs(self.schedule.retry_interval_secs),
            restart_pause: Duration::from_secs(self.schedule.restart_pause_secs),
            schedule: self.schedule.bands.clone(),
            ..ListenerSettings::default()
        }
    }

    /// Checks the settings a listener cannot start without.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("listener.instance_name", &self.listener.instance_name),
            ("listener.environment", &self.listener.environment),
            ("listener.api_url", &self.listener.api_url),
            ("listener.graph_url", &self.listener.graph_url),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} must be set")));
            }
        }

        let intervals = [
            ("schedule.poll_interval_secs", self.schedule.poll_interval_secs),
            ("schedule.retry_interval_secs", self.schedule.retry_interval_secs),
        ];
        for (name, secs) in intervals {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        if self.database.pool_max_size == 0 {
            return Err(ConfigError::Invalid(
                "database.pool_max_size must be greater than zero".to_string(),
            ));
        }

        // Interpolated into the query text verbatim.
        let names = std::iter::once(&self.source.entity).chain(self.source.fields.iter());
        for name in names {
            if !is_graphql_name(name) {
                return Err(ConfigError::Invalid(format!(
                    "'{name}' is not a valid GraphQL field name"
                )));
            }
        }

        Ok(())
    }
}

fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration parsed but cannot run a listener.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// validates it.
///
/// Environment variable overrides:
/// - `BEACON_INSTANCE_NAME` overrides `listener.instance_name`
/// - `BEACON_ENVIRONMENT` overrides `listener.environment`
/// - `BEACON_API_URL` overrides `listener.api_url`
/// - `BEACON_GRAPH_URL` overrides `listener.graph_url`
/// - `BEACON_DB_PATH` overrides `database.path`
/// - `BEACON_TELEMETRY_DSN` overrides `telemetry.dsn` (empty disables it)
/// - `BEACON_LOG_LEVEL` overrides `logging.level`
/// - `BEACON_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the result fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an explicit environment lookup.
pub fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(name) = env("BEACON_INSTANCE_NAME") {
        config.listener.instance_name = name;
    }
    if let Some(environment) = env("BEACON_ENVIRONMENT") {
        config.listener.environment = environment;
    }
    if let Some(url) = env("BEACON_API_URL") {
        config.listener.api_url = url;
    }
    if let Some(url) = env("BEACON_GRAPH_URL") {
        config.listener.graph_url = url;
    }
    if let Some(db_path) = env("BEACON_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(dsn) = env("BEACON_TELEMETRY_DSN") {
        config.telemetry.dsn = Some(dsn).filter(|d| !d.trim().is_empty());
    }
    if let Some(level) = env("BEACON_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("BEACON_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config.validate()?;
    Ok(config)
}
