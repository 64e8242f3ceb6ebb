use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use procura_core::config::{ChannelConfig, ChannelMode};

use crate::channel::{InboundHandler, InboundMessage, MessageChannel};
use crate::error::ChannelError;
use crate::live::{LiveChannel, ReconnectPolicy};
use crate::simulated::SimulatedChannel;

/// Channel variant resolved once at startup. Nothing swaps it afterwards; a live channel
/// moves from unpaired to paired through [`ChannelBackend::pair_if_live`].
pub enum ChannelBackend {
    Simulated(SimulatedChannel),
    Live(LiveChannel),
}

impl ChannelBackend {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let backend = match config.mode {
            ChannelMode::Simulated => Self::Simulated(SimulatedChannel::new()),
            ChannelMode::Live => Self::Live(LiveChannel::from_config(config)?),
        };
        info!(event_name = "channel.backend.selected", mode = config.mode.as_str(), "channel ready");
        Ok(backend)
    }

    pub fn mode(&self) -> ChannelMode {
        match self {
            Self::Simulated(_) => ChannelMode::Simulated,
            Self::Live(_) => ChannelMode::Live,
        }
    }

    pub fn as_simulated(&self) -> Option<&SimulatedChannel> {
        match self {
            Self::Simulated(channel) => Some(channel),
            Self::Live(_) => None,
        }
    }

    pub fn as_live(&self) -> Option<&LiveChannel> {
        match self {
            Self::Live(channel) => Some(channel),
            Self::Simulated(_) => None,
        }
    }

    /// Simulated channels need no pairing.
    pub async fn pair_if_live(&self, policy: &ReconnectPolicy) -> Result<(), ChannelError> {
        match self {
            Self::Simulated(_) => Ok(()),
            Self::Live(channel) => channel.pair_with_retry(policy).await,
        }
    }

    /// Hands a message that arrived out of band (webhook, operator) to the registered
    /// handlers. Returns how many handlers ran.
    pub async fn deliver_inbound(&self, message: InboundMessage) -> Result<usize, ChannelError> {
        match self {
            Self::Simulated(channel) => {
                channel.simulate_reply(message.from, message.body).await
            }
            Self::Live(channel) => channel.deliver_inbound(message).await,
        }
    }
}

#[async_trait]
impl MessageChannel for ChannelBackend {
    async fn send(&self, address: &str, text: &str) -> Result<(), ChannelError> {
        match self {
            Self::Simulated(channel) => channel.send(address, text).await,
            Self::Live(channel) => channel.send(address, text).await,
        }
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) {
        match self {
            Self::Simulated(channel) => channel.listen(handler).await,
            Self::Live(channel) => channel.listen(handler).await,
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        match self {
            Self::Simulated(channel) => channel.close().await,
            Self::Live(channel) => channel.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use procura_core::config::{ChannelConfig, ChannelMode};

    use super::ChannelBackend;
    use crate::channel::{InboundHandler, InboundMessage, MessageChannel};
    use crate::error::ChannelError;
    use crate::live::ReconnectPolicy;

    fn config(mode: ChannelMode) -> ChannelConfig {
        ChannelConfig {
            mode,
            gateway_url: Some("http://127.0.0.1:9".to_owned()),
            gateway_token: Some(SecretString::from("token".to_owned())),
            pairing_max_retries: 0,
            pairing_base_delay_ms: 0,
            pairing_max_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn simulated_mode_records_without_pairing() {
        let backend = ChannelBackend::from_config(&config(ChannelMode::Simulated)).expect("backend");
        backend.pair_if_live(&ReconnectPolicy::default()).await.expect("no pairing needed");
        backend.send("+1", "hello").await.expect("send");

        assert_eq!(backend.mode(), ChannelMode::Simulated);
        let sent = backend.as_simulated().expect("simulated").sent().await;
        assert_eq!(sent.len(), 1);
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl InboundHandler for Counter {
        async fn on_message(&self, _message: InboundMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn out_of_band_messages_reach_handlers_in_both_modes() {
        for mode in [ChannelMode::Simulated, ChannelMode::Live] {
            let backend = ChannelBackend::from_config(&config(mode)).expect("backend");
            let counter = Arc::new(Counter::default());
            backend.listen(counter.clone()).await;

            let handled =
                backend.deliver_inbound(InboundMessage::new("+1", "R$ 5,00")).await.expect("deliver");

            assert_eq!(handled, 1, "{mode:?}");
            assert_eq!(counter.0.load(Ordering::SeqCst), 1);

            backend.close().await.expect("close");
            assert_eq!(
                backend.deliver_inbound(InboundMessage::new("+1", "late")).await,
                Err(ChannelError::Closed)
            );
        }
    }

    #[tokio::test]
    async fn live_mode_starts_unpaired() {
        let backend = ChannelBackend::from_config(&config(ChannelMode::Live)).expect("backend");

        assert!(backend.as_live().is_some());
        assert_eq!(backend.send("+1", "hello").await, Err(ChannelError::NotPaired));
    }

    #[test]
    fn live_mode_without_gateway_is_rejected() {
        let mut config = config(ChannelMode::Live);
        config.gateway_url = None;

        assert!(matches!(
            ChannelBackend::from_config(&config),
            Err(ChannelError::Configuration(_))
        ));
    }
}
