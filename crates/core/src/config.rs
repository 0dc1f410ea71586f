use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{RetrySettings, RetryStrategy, WorkflowDefaults};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub channels: ChannelsConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub max_step_visits: u32,
    pub retry_strategy: RetryStrategy,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub default_timeout_secs: u64,
}

impl EngineConfig {
    /// Workflow-level defaults derived from configuration; individual
    /// definitions and steps may still override them.
    pub fn workflow_defaults(&self) -> WorkflowDefaults {
        WorkflowDefaults {
            retry: RetrySettings {
                strategy: self.retry_strategy,
                max_attempts: self.max_attempts,
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
            },
            timeout_secs: self.default_timeout_secs,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelsConfig {
    pub daily_cap: u32,
    pub jitter_min_secs: u64,
    pub jitter_max_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
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
    pub daily_cap: Option<u32>,
    pub max_step_visits: Option<u32>,
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_token: Option<String>,
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
                url: "sqlite://leadflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineConfig {
                max_step_visits: 8,
                retry_strategy: RetryStrategy::Exponential,
                max_attempts: 3,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
                default_timeout_secs: 300,
            },
            channels: ChannelsConfig { daily_cap: 50, jitter_min_secs: 30, jitter_max_secs: 180 },
            notify: NotifyConfig { webhook_url: None, webhook_token: None },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

fn parse_strategy(value: &str) -> Result<RetryStrategy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "linear" => Ok(RetryStrategy::Linear),
        "exponential" => Ok(RetryStrategy::Exponential),
        other => Err(ConfigError::Validation(format!(
            "unsupported retry strategy `{other}` (expected linear|exponential)"
        ))),
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
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

        if let Some(engine) = patch.engine {
            if let Some(max_step_visits) = engine.max_step_visits {
                self.engine.max_step_visits = max_step_visits;
            }
            if let Some(retry_strategy) = engine.retry_strategy {
                self.engine.retry_strategy = parse_strategy(&retry_strategy)?;
            }
            if let Some(max_attempts) = engine.max_attempts {
                self.engine.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = engine.base_delay_ms {
                self.engine.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = engine.max_delay_ms {
                self.engine.max_delay_ms = max_delay_ms;
            }
            if let Some(default_timeout_secs) = engine.default_timeout_secs {
                self.engine.default_timeout_secs = default_timeout_secs;
            }
        }

        if let Some(channels) = patch.channels {
            if let Some(daily_cap) = channels.daily_cap {
                self.channels.daily_cap = daily_cap;
            }
            if let Some(jitter_min_secs) = channels.jitter_min_secs {
                self.channels.jitter_min_secs = jitter_min_secs;
            }
            if let Some(jitter_max_secs) = channels.jitter_max_secs {
                self.channels.jitter_max_secs = jitter_max_secs;
            }
        }

        if let Some(notify) = patch.notify {
            if let Some(webhook_url) = notify.webhook_url {
                self.notify.webhook_url = Some(webhook_url);
            }
            if let Some(webhook_token_value) = notify.webhook_token {
                self.notify.webhook_token = Some(secret_value(webhook_token_value));
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

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_ENGINE_MAX_STEP_VISITS") {
            self.engine.max_step_visits = parse_u32("LEADFLOW_ENGINE_MAX_STEP_VISITS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ENGINE_RETRY_STRATEGY") {
            self.engine.retry_strategy = parse_strategy(&value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ENGINE_MAX_ATTEMPTS") {
            self.engine.max_attempts = parse_u32("LEADFLOW_ENGINE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ENGINE_BASE_DELAY_MS") {
            self.engine.base_delay_ms = parse_u64("LEADFLOW_ENGINE_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ENGINE_MAX_DELAY_MS") {
            self.engine.max_delay_ms = parse_u64("LEADFLOW_ENGINE_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_ENGINE_DEFAULT_TIMEOUT_SECS") {
            self.engine.default_timeout_secs =
                parse_u64("LEADFLOW_ENGINE_DEFAULT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_CHANNELS_DAILY_CAP") {
            self.channels.daily_cap = parse_u32("LEADFLOW_CHANNELS_DAILY_CAP", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_CHANNELS_JITTER_MIN_SECS") {
            self.channels.jitter_min_secs =
                parse_u64("LEADFLOW_CHANNELS_JITTER_MIN_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADFLOW_CHANNELS_JITTER_MAX_SECS") {
            self.channels.jitter_max_secs =
                parse_u64("LEADFLOW_CHANNELS_JITTER_MAX_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADFLOW_NOTIFY_WEBHOOK_URL") {
            self.notify.webhook_url = Some(value);
        }
        if let Some(value) = read_env("LEADFLOW_NOTIFY_WEBHOOK_TOKEN") {
            self.notify.webhook_token = Some(secret_value(value));
        }

        let log_level =
            read_env("LEADFLOW_LOGGING_LEVEL").or_else(|| read_env("LEADFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADFLOW_LOGGING_FORMAT").or_else(|| read_env("LEADFLOW_LOG_FORMAT"));
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
        if let Some(daily_cap) = overrides.daily_cap {
            self.channels.daily_cap = daily_cap;
        }
        if let Some(max_step_visits) = overrides.max_step_visits {
            self.engine.max_step_visits = max_step_visits;
        }
        if let Some(webhook_url) = overrides.notify_webhook_url {
            self.notify.webhook_url = Some(webhook_url);
        }
        if let Some(webhook_token) = overrides.notify_webhook_token {
            self.notify.webhook_token = Some(secret_value(webhook_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        validate_channels(&self.channels)?;
        validate_notify(&self.notify)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadflow.toml"), PathBuf::from("config/leadflow.toml")]
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

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.max_step_visits == 0 {
        return Err(ConfigError::Validation(
            "engine.max_step_visits must be greater than zero".to_string(),
        ));
    }

    if engine.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "engine.max_attempts must be greater than zero".to_string(),
        ));
    }

    if engine.max_delay_ms < engine.base_delay_ms {
        return Err(ConfigError::Validation(
            "engine.max_delay_ms must not be below engine.base_delay_ms".to_string(),
        ));
    }

    if engine.default_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.default_timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_channels(channels: &ChannelsConfig) -> Result<(), ConfigError> {
    if channels.daily_cap == 0 {
        return Err(ConfigError::Validation(
            "channels.daily_cap must be greater than zero".to_string(),
        ));
    }

    if channels.jitter_max_secs < channels.jitter_min_secs {
        return Err(ConfigError::Validation(
            "channels.jitter_max_secs must not be below channels.jitter_min_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_notify(notify: &NotifyConfig) -> Result<(), ConfigError> {
    if let Some(url) = &notify.webhook_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notify.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if notify.webhook_token.is_some() && notify.webhook_url.is_none() {
        return Err(ConfigError::Validation(
            "notify.webhook_token is set but notify.webhook_url is missing".to_string(),
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    channels: Option<ChannelsPatch>,
    notify: Option<NotifyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    max_step_visits: Option<u32>,
    retry_strategy: Option<String>,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    default_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsPatch {
    daily_cap: Option<u32>,
    jitter_min_secs: Option<u64>,
    jitter_max_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyPatch {
    webhook_url: Option<String>,
    webhook_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
