use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correlation::CorrelationPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub assistant: AssistantConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub gateway_url: Option<String>,
    pub gateway_token: Option<SecretString>,
    pub pairing_max_retries: u32,
    pub pairing_base_delay_ms: u64,
    pub pairing_max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub backend: AssistantBackendKind,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub locality: String,
    pub quote_timeout_secs: u64,
    pub urgent_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub correlation_policy: CorrelationPolicy,
    pub notify_on_reply: bool,
}

impl EngineConfig {
    pub fn quote_timeout(&self) -> Duration {
        Duration::from_secs(self.quote_timeout_secs)
    }

    pub fn urgent_timeout(&self) -> Duration {
        Duration::from_secs(self.urgent_timeout_secs)
    }

    pub fn timeout_for(&self, urgent: bool) -> Duration {
        if urgent {
            self.urgent_timeout()
        } else {
            self.quote_timeout()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locality: "local".to_string(),
            quote_timeout_secs: 1800,
            urgent_timeout_secs: 300,
            poll_interval_secs: 10,
            correlation_policy: CorrelationPolicy::MostRecentPending,
            notify_on_reply: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Simulated,
    Live,
}

impl ChannelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Live => "live",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantBackendKind {
    Heuristic,
    Anthropic,
}

impl AssistantBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            Self::Anthropic => "anthropic",
        }
    }
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
    pub channel_mode: Option<ChannelMode>,
    pub assistant_backend: Option<AssistantBackendKind>,
    pub assistant_model: Option<String>,
    pub locality: Option<String>,
    pub correlation_policy: Option<CorrelationPolicy>,
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
                url: "sqlite://procura.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                mode: ChannelMode::Simulated,
                gateway_url: None,
                gateway_token: None,
                pairing_max_retries: 5,
                pairing_base_delay_ms: 250,
                pairing_max_delay_ms: 5_000,
            },
            assistant: AssistantConfig {
                backend: AssistantBackendKind::Heuristic,
                api_key: None,
                base_url: "https://api.anthropic.com".to_string(),
                model: "claude-3-5-haiku-latest".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            engine: EngineConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ChannelMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulated" | "dry_run" | "dry-run" => Ok(Self::Simulated),
            "live" => Ok(Self::Live),
            other => Err(ConfigError::Validation(format!(
                "unsupported channel mode `{other}` (expected simulated|live)"
            ))),
        }
    }
}

impl std::str::FromStr for AssistantBackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(ConfigError::Validation(format!(
                "unsupported assistant backend `{other}` (expected heuristic|anthropic)"
            ))),
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("procura.toml"));
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

        if let Some(channel) = patch.channel {
            if let Some(mode) = channel.mode {
                self.channel.mode = mode;
            }
            if let Some(gateway_url) = channel.gateway_url {
                self.channel.gateway_url = Some(gateway_url);
            }
            if let Some(gateway_token_value) = channel.gateway_token {
                self.channel.gateway_token = Some(secret_value(gateway_token_value));
            }
            if let Some(max_retries) = channel.pairing_max_retries {
                self.channel.pairing_max_retries = max_retries;
            }
            if let Some(base_delay_ms) = channel.pairing_base_delay_ms {
                self.channel.pairing_base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = channel.pairing_max_delay_ms {
                self.channel.pairing_max_delay_ms = max_delay_ms;
            }
        }

        if let Some(assistant) = patch.assistant {
            if let Some(backend) = assistant.backend {
                self.assistant.backend = backend;
            }
            if let Some(api_key_value) = assistant.api_key {
                self.assistant.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = assistant.base_url {
                self.assistant.base_url = base_url;
            }
            if let Some(model) = assistant.model {
                self.assistant.model = model;
            }
            if let Some(timeout_secs) = assistant.timeout_secs {
                self.assistant.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = assistant.max_retries {
                self.assistant.max_retries = max_retries;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(locality) = engine.locality {
                self.engine.locality = locality;
            }
            if let Some(quote_timeout_secs) = engine.quote_timeout_secs {
                self.engine.quote_timeout_secs = quote_timeout_secs;
            }
            if let Some(urgent_timeout_secs) = engine.urgent_timeout_secs {
                self.engine.urgent_timeout_secs = urgent_timeout_secs;
            }
            if let Some(poll_interval_secs) = engine.poll_interval_secs {
                self.engine.poll_interval_secs = poll_interval_secs;
            }
            if let Some(correlation_policy) = engine.correlation_policy {
                self.engine.correlation_policy = correlation_policy;
            }
            if let Some(notify_on_reply) = engine.notify_on_reply {
                self.engine.notify_on_reply = notify_on_reply;
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
        if let Some(value) = read_env("PROCURA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROCURA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PROCURA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROCURA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PROCURA_CHANNEL_MODE") {
            self.channel.mode = value.parse()?;
        }
        if let Some(value) = read_env("PROCURA_CHANNEL_GATEWAY_URL") {
            self.channel.gateway_url = Some(value);
        }
        if let Some(value) = read_env("PROCURA_CHANNEL_GATEWAY_TOKEN") {
            self.channel.gateway_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("PROCURA_CHANNEL_PAIRING_MAX_RETRIES") {
            self.channel.pairing_max_retries =
                parse_u32("PROCURA_CHANNEL_PAIRING_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PROCURA_ASSISTANT_BACKEND") {
            self.assistant.backend = value.parse()?;
        }
        let api_key =
            read_env("PROCURA_ASSISTANT_API_KEY").or_else(|| read_env("ANTHROPIC_API_KEY"));
        if let Some(value) = api_key {
            self.assistant.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PROCURA_ASSISTANT_BASE_URL") {
            self.assistant.base_url = value;
        }
        if let Some(value) = read_env("PROCURA_ASSISTANT_MODEL") {
            self.assistant.model = value;
        }
        if let Some(value) = read_env("PROCURA_ASSISTANT_TIMEOUT_SECS") {
            self.assistant.timeout_secs = parse_u64("PROCURA_ASSISTANT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_ASSISTANT_MAX_RETRIES") {
            self.assistant.max_retries = parse_u32("PROCURA_ASSISTANT_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("PROCURA_ENGINE_LOCALITY") {
            self.engine.locality = value;
        }
        if let Some(value) = read_env("PROCURA_ENGINE_QUOTE_TIMEOUT_SECS") {
            self.engine.quote_timeout_secs =
                parse_u64("PROCURA_ENGINE_QUOTE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_ENGINE_URGENT_TIMEOUT_SECS") {
            self.engine.urgent_timeout_secs =
                parse_u64("PROCURA_ENGINE_URGENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_ENGINE_POLL_INTERVAL_SECS") {
            self.engine.poll_interval_secs =
                parse_u64("PROCURA_ENGINE_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("PROCURA_ENGINE_CORRELATION_POLICY") {
            self.engine.correlation_policy =
                value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "PROCURA_ENGINE_CORRELATION_POLICY".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = read_env("PROCURA_ENGINE_NOTIFY_ON_REPLY") {
            self.engine.notify_on_reply = parse_bool("PROCURA_ENGINE_NOTIFY_ON_REPLY", &value)?;
        }

        if let Some(value) = read_env("PROCURA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PROCURA_SERVER_PORT") {
            self.server.port = parse_u16("PROCURA_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PROCURA_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PROCURA_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("PROCURA_LOGGING_LEVEL").or_else(|| read_env("PROCURA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROCURA_LOGGING_FORMAT").or_else(|| read_env("PROCURA_LOG_FORMAT"));
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
        if let Some(channel_mode) = overrides.channel_mode {
            self.channel.mode = channel_mode;
        }
        if let Some(backend) = overrides.assistant_backend {
            self.assistant.backend = backend;
        }
        if let Some(model) = overrides.assistant_model {
            self.assistant.model = model;
        }
        if let Some(locality) = overrides.locality {
            self.engine.locality = locality;
        }
        if let Some(policy) = overrides.correlation_policy {
            self.engine.correlation_policy = policy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_assistant(&self.assistant)?;
        validate_engine(&self.engine)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("procura.toml"), PathBuf::from("config/procura.toml")]
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

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.pairing_base_delay_ms > channel.pairing_max_delay_ms {
        return Err(ConfigError::Validation(
            "channel.pairing_base_delay_ms must not exceed channel.pairing_max_delay_ms"
                .to_string(),
        ));
    }

    if channel.mode == ChannelMode::Simulated {
        return Ok(());
    }

    match channel.gateway_url.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ConfigError::Validation(
                "channel.gateway_url is required when channel.mode is `live`".to_string(),
            ))
        }
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
            return Err(ConfigError::Validation(
                "channel.gateway_url must start with http:// or https://".to_string(),
            ))
        }
        Some(_) => {}
    }

    let missing_token = channel
        .gateway_token
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_token {
        return Err(ConfigError::Validation(
            "channel.gateway_token is required when channel.mode is `live`".to_string(),
        ));
    }

    Ok(())
}

fn validate_assistant(assistant: &AssistantConfig) -> Result<(), ConfigError> {
    if assistant.timeout_secs == 0 || assistant.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "assistant.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if assistant.backend == AssistantBackendKind::Anthropic {
        let missing = assistant
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "assistant.api_key is required for the anthropic backend".to_string(),
            ));
        }
        if assistant.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "assistant.model is required for the anthropic backend".to_string(),
            ));
        }
    }

    Ok(())
}

/// One week. Longer waits are not meaningful for a chat solicitation.
pub const MAX_QUOTE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    let timeouts = 1..=MAX_QUOTE_TIMEOUT_SECS;
    if !timeouts.contains(&engine.quote_timeout_secs)
        || !timeouts.contains(&engine.urgent_timeout_secs)
    {
        return Err(ConfigError::Validation(format!(
            "engine.quote_timeout_secs and engine.urgent_timeout_secs must be in range 1..={MAX_QUOTE_TIMEOUT_SECS}"
        )));
    }

    if engine.poll_interval_secs == 0 || engine.poll_interval_secs > engine.quote_timeout_secs {
        return Err(ConfigError::Validation(
            "engine.poll_interval_secs must be in range 1..=engine.quote_timeout_secs".to_string(),
        ));
    }

    if engine.locality.trim().is_empty() {
        return Err(ConfigError::Validation("engine.locality must not be empty".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
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
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    assistant: Option<AssistantPatch>,
    engine: Option<EnginePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    mode: Option<ChannelMode>,
    gateway_url: Option<String>,
    gateway_token: Option<String>,
    pairing_max_retries: Option<u32>,
    pairing_base_delay_ms: Option<u64>,
    pairing_max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AssistantPatch {
    backend: Option<AssistantBackendKind>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    locality: Option<String>,
    quote_timeout_secs: Option<u64>,
    urgent_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    correlation_policy: Option<CorrelationPolicy>,
    notify_on_reply: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
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
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, AssistantBackendKind, ChannelMode, ConfigError, ConfigOverrides, LoadOptions,
        LogFormat, MAX_QUOTE_TIMEOUT_SECS,
    };
    use crate::correlation::CorrelationPolicy;

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
    fn defaults_are_offline_and_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.channel.mode == ChannelMode::Simulated, "default channel is simulated")?;
        ensure(
            config.assistant.backend == AssistantBackendKind::Heuristic,
            "default assistant is heuristic",
        )?;
        ensure(config.engine.quote_timeout() == Duration::from_secs(1800), "30 minute timeout")?;
        ensure(config.engine.timeout_for(true) == Duration::from_secs(300), "5 minute urgent")?;
        ensure(config.engine.poll_interval() == Duration::from_secs(10), "10 second poll")?;
        ensure(
            config.engine.correlation_policy == CorrelationPolicy::MostRecentPending,
            "most recent pending is the default policy",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_TOKEN", "gw-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("procura.toml");
            fs::write(
                &path,
                r#"
[channel]
mode = "live"
gateway_url = "http://127.0.0.1:3001"
gateway_token = "${TEST_GATEWAY_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.channel.mode == ChannelMode::Live, "channel mode should be live")?;
            ensure(
                config
                    .channel
                    .gateway_token
                    .as_ref()
                    .is_some_and(|token| token.expose_secret() == "gw-from-env"),
                "gateway token should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_GATEWAY_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_LOG_LEVEL", "warn");
        env::set_var("PROCURA_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["PROCURA_LOG_LEVEL", "PROCURA_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PROCURA_ENGINE_LOCALITY", "campo grande");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("procura.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[engine]
locality = "dourados"
urgent_timeout_secs = 120
correlation_policy = "token"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.engine.locality == "campo grande", "env locality should win over file")?;
            ensure(config.engine.urgent_timeout_secs == 120, "file value should beat defaults")?;
            ensure(
                config.engine.correlation_policy == CorrelationPolicy::Token,
                "file correlation policy should be applied",
            )
        })();

        clear_vars(&["PROCURA_DATABASE_URL", "PROCURA_ENGINE_LOCALITY"]);
        result
    }

    #[test]
    fn live_channel_without_gateway_fails_fast() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_CHANNEL_MODE", "live");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("channel.gateway_url")
            );
            ensure(has_message, "validation failure should mention channel.gateway_url")
        })();

        clear_vars(&["PROCURA_CHANNEL_MODE"]);
        result
    }

    #[test]
    fn anthropic_backend_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                assistant_backend: Some(AssistantBackendKind::Anthropic),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        if env::var("ANTHROPIC_API_KEY").is_ok() || env::var("PROCURA_ASSISTANT_API_KEY").is_ok()
        {
            return Ok(());
        }

        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("assistant.api_key")),
            "validation failure should mention assistant.api_key",
        )
    }

    #[test]
    fn invalid_numeric_override_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_ENGINE_POLL_INTERVAL_SECS", "ten");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "PROCURA_ENGINE_POLL_INTERVAL_SECS",
                "error should name the offending variable",
            ),
            _ => Err("expected InvalidEnvOverride".to_string()),
        };

        clear_vars(&["PROCURA_ENGINE_POLL_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn engine_timeouts_are_bounded() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.engine.quote_timeout_secs = 9_223_372_036_854_775_807;
        ensure(
            matches!(config.validate(), Err(ConfigError::Validation(ref message)) if message.contains("engine.quote_timeout_secs")),
            "an unbounded quote timeout should be rejected",
        )?;

        config.engine.quote_timeout_secs = MAX_QUOTE_TIMEOUT_SECS;
        config.engine.urgent_timeout_secs = MAX_QUOTE_TIMEOUT_SECS + 1;
        ensure(config.validate().is_err(), "urgent timeout above the cap should be rejected")?;

        config.engine.urgent_timeout_secs = MAX_QUOTE_TIMEOUT_SECS;
        ensure(config.validate().is_ok(), "timeouts at the cap are valid")
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PROCURA_ASSISTANT_API_KEY", "sk-ant-secret-value");
        env::set_var("PROCURA_CHANNEL_GATEWAY_TOKEN", "gw-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-ant-secret-value"), "debug output should not contain api key")?;
            ensure(
                !debug.contains("gw-secret-value"),
                "debug output should not contain gateway token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["PROCURA_ASSISTANT_API_KEY", "PROCURA_CHANNEL_GATEWAY_TOKEN"]);
        result
    }
}
