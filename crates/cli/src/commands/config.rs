use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use procura_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    CommandResult::success("config", render(&config))
}

/// Effective configuration, one line per key, secrets redacted.
pub fn render(config: &AppConfig) -> String {
    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());
    let sources = Sources { doc: file_doc.as_ref(), path: file_path.as_deref() };

    let gateway_token = config
        .channel
        .gateway_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let api_key = config
        .assistant
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.push(sources.line(
        "database.url",
        config.database.url.clone(),
        &["PROCURA_DATABASE_URL"],
    ));
    lines.push(sources.line(
        "database.max_connections",
        config.database.max_connections.to_string(),
        &["PROCURA_DATABASE_MAX_CONNECTIONS"],
    ));
    lines.push(sources.line(
        "database.timeout_secs",
        config.database.timeout_secs.to_string(),
        &["PROCURA_DATABASE_TIMEOUT_SECS"],
    ));
    lines.push(sources.line(
        "channel.mode",
        config.channel.mode.as_str().to_string(),
        &["PROCURA_CHANNEL_MODE"],
    ));
    lines.push(sources.line(
        "channel.gateway_url",
        config.channel.gateway_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        &["PROCURA_CHANNEL_GATEWAY_URL"],
    ));
    lines.push(sources.line(
        "channel.gateway_token",
        gateway_token,
        &["PROCURA_CHANNEL_GATEWAY_TOKEN"],
    ));
    lines.push(sources.line(
        "assistant.backend",
        config.assistant.backend.as_str().to_string(),
        &["PROCURA_ASSISTANT_BACKEND"],
    ));
    lines.push(sources.line(
        "assistant.model",
        config.assistant.model.clone(),
        &["PROCURA_ASSISTANT_MODEL"],
    ));
    lines.push(sources.line(
        "assistant.base_url",
        config.assistant.base_url.clone(),
        &["PROCURA_ASSISTANT_BASE_URL"],
    ));
    lines.push(sources.line(
        "assistant.api_key",
        api_key,
        &["PROCURA_ASSISTANT_API_KEY", "ANTHROPIC_API_KEY"],
    ));
    lines.push(sources.line(
        "engine.locality",
        config.engine.locality.clone(),
        &["PROCURA_ENGINE_LOCALITY"],
    ));
    lines.push(sources.line(
        "engine.quote_timeout_secs",
        config.engine.quote_timeout_secs.to_string(),
        &["PROCURA_ENGINE_QUOTE_TIMEOUT_SECS"],
    ));
    lines.push(sources.line(
        "engine.urgent_timeout_secs",
        config.engine.urgent_timeout_secs.to_string(),
        &["PROCURA_ENGINE_URGENT_TIMEOUT_SECS"],
    ));
    lines.push(sources.line(
        "engine.poll_interval_secs",
        config.engine.poll_interval_secs.to_string(),
        &["PROCURA_ENGINE_POLL_INTERVAL_SECS"],
    ));
    lines.push(sources.line(
        "engine.correlation_policy",
        config.engine.correlation_policy.as_str().to_string(),
        &["PROCURA_ENGINE_CORRELATION_POLICY"],
    ));
    lines.push(sources.line(
        "engine.notify_on_reply",
        config.engine.notify_on_reply.to_string(),
        &["PROCURA_ENGINE_NOTIFY_ON_REPLY"],
    ));
    lines.push(sources.line(
        "server.bind_address",
        config.server.bind_address.clone(),
        &["PROCURA_SERVER_BIND_ADDRESS"],
    ));
    lines.push(sources.line(
        "server.port",
        config.server.port.to_string(),
        &["PROCURA_SERVER_PORT"],
    ));
    lines.push(sources.line(
        "logging.level",
        config.logging.level.clone(),
        &["PROCURA_LOGGING_LEVEL", "PROCURA_LOG_LEVEL"],
    ));
    lines.push(sources.line(
        "logging.format",
        format!("{:?}", config.logging.format).to_lowercase(),
        &["PROCURA_LOGGING_FORMAT", "PROCURA_LOG_FORMAT"],
    ));
    lines.join("\n")
}

struct Sources<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl Sources<'_> {
    fn line(&self, key: &str, value: String, env_keys: &[&str]) -> String {
        render_line(key, &value, self.of(key, env_keys))
    }

    fn of(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("procura.toml"), PathBuf::from("config/procura.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
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
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
