use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use procura_core::config::ChannelConfig;

use crate::channel::{HandlerRegistry, InboundHandler, InboundMessage, MessageChannel};
use crate::error::ChannelError;

const GATEWAY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairingState {
    Unpaired,
    Paired { session_id: String, paired_at: DateTime<Utc> },
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            max_retries: config.pairing_max_retries,
            base_delay_ms: config.pairing_base_delay_ms,
            max_delay_ms: config.pairing_max_delay_ms,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Debug, Deserialize)]
struct SessionStatus {
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutboundPayload<'a> {
    to: &'a str,
    text: &'a str,
}

/// Gateway-backed channel. Outbound messages are posted to `{gateway}/messages`; inbound
/// messages arrive through the service webhook and are handed to
/// [`LiveChannel::deliver_inbound`]. Sending is gated on the pairing state.
pub struct LiveChannel {
    client: Client,
    gateway_url: String,
    token: SecretString,
    state: RwLock<PairingState>,
    handlers: HandlerRegistry,
}

impl LiveChannel {
    pub fn new(gateway_url: impl Into<String>, token: SecretString) -> Result<Self, ChannelError> {
        let gateway_url = gateway_url.into().trim_end_matches('/').to_owned();
        if !gateway_url.starts_with("http://") && !gateway_url.starts_with("https://") {
            return Err(ChannelError::Configuration(format!(
                "gateway url must start with http:// or https://, got `{gateway_url}`"
            )));
        }

        let client = Client::builder()
            .timeout(GATEWAY_REQUEST_TIMEOUT)
            .build()
            .map_err(|error| ChannelError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            gateway_url,
            token,
            state: RwLock::new(PairingState::Unpaired),
            handlers: HandlerRegistry::default(),
        })
    }

    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let gateway_url = config.gateway_url.clone().ok_or_else(|| {
            ChannelError::Configuration("channel.gateway_url is required".to_owned())
        })?;
        let token = config.gateway_token.clone().ok_or_else(|| {
            ChannelError::Configuration("channel.gateway_token is required".to_owned())
        })?;
        Self::new(gateway_url, token)
    }

    pub async fn state(&self) -> PairingState {
        self.state.read().await.clone()
    }

    pub async fn is_paired(&self) -> bool {
        matches!(*self.state.read().await, PairingState::Paired { .. })
    }

    /// Asks the gateway whether its session is connected and moves to `Paired` when it is.
    pub async fn pair(&self) -> Result<(), ChannelError> {
        if matches!(*self.state.read().await, PairingState::Closed) {
            return Err(ChannelError::Closed);
        }

        let response = self
            .client
            .get(format!("{}/session", self.gateway_url))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Gateway { status: status.as_u16(), body });
        }

        let session: SessionStatus = response
            .json()
            .await
            .map_err(|error| ChannelError::Transport(format!("invalid session payload: {error}")))?;
        if !session.connected {
            return Err(ChannelError::NotPaired);
        }

        let session_id = session.session_id.unwrap_or_else(|| "default".to_owned());
        info!(event_name = "channel.live.paired", session_id = %session_id, "gateway session paired");

        let mut state = self.state.write().await;
        if matches!(*state, PairingState::Closed) {
            return Err(ChannelError::Closed);
        }
        *state = PairingState::Paired { session_id, paired_at: Utc::now() };
        Ok(())
    }

    pub async fn pair_with_retry(&self, policy: &ReconnectPolicy) -> Result<(), ChannelError> {
        let mut last_error = ChannelError::NotPaired;

        for attempt in 0..=policy.max_retries {
            match self.pair().await {
                Ok(()) => return Ok(()),
                Err(ChannelError::Closed) => return Err(ChannelError::Closed),
                Err(error) => {
                    warn!(
                        event_name = "channel.live.pair_failed",
                        attempt,
                        max_retries = policy.max_retries,
                        error = %error,
                        "gateway pairing attempt failed"
                    );
                    last_error = error;
                    if attempt < policy.max_retries {
                        let delay = policy.backoff(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Entry point for messages the gateway pushes to the service webhook.
    pub async fn deliver_inbound(&self, message: InboundMessage) -> Result<usize, ChannelError> {
        if matches!(*self.state.read().await, PairingState::Closed) {
            return Err(ChannelError::Closed);
        }
        Ok(self.handlers.dispatch(message).await)
    }
}

#[async_trait]
impl MessageChannel for LiveChannel {
    async fn send(&self, address: &str, text: &str) -> Result<(), ChannelError> {
        match &*self.state.read().await {
            PairingState::Paired { .. } => {}
            PairingState::Unpaired => return Err(ChannelError::NotPaired),
            PairingState::Closed => return Err(ChannelError::Closed),
        }

        let response = self
            .client
            .post(format!("{}/messages", self.gateway_url))
            .bearer_auth(self.token.expose_secret())
            .json(&OutboundPayload { to: address, text })
            .send()
            .await
            .map_err(|error| ChannelError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Gateway { status: status.as_u16(), body });
        }

        info!(event_name = "channel.live.sent", address, "message handed to gateway");
        Ok(())
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) {
        self.handlers.register(handler).await;
    }

    async fn close(&self) -> Result<(), ChannelError> {
        *self.state.write().await = PairingState::Closed;
        self.handlers.clear().await;
        info!(event_name = "channel.live.closed", "gateway channel closed");
        Ok(())
    }
}
