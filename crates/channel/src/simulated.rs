use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::channel::{HandlerRegistry, InboundHandler, InboundMessage, MessageChannel};
use crate::error::ChannelError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub address: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Dry-run channel: records every send instead of delivering it. Replies are injected with
/// [`SimulatedChannel::simulate_reply`].
#[derive(Clone, Default)]
pub struct SimulatedChannel {
    inner: Arc<SimulatedInner>,
}

#[derive(Default)]
struct SimulatedInner {
    sent: Mutex<Vec<SentMessage>>,
    handlers: HandlerRegistry,
    closed: AtomicBool,
}

impl SimulatedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Pushes a reply through the registered handlers as if the counterparty had answered.
    pub async fn simulate_reply(
        &self,
        from: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<usize, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        Ok(self.inner.handlers.dispatch(InboundMessage::new(from, body)).await)
    }
}

#[async_trait]
impl MessageChannel for SimulatedChannel {
    async fn send(&self, address: &str, text: &str) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        info!(
            event_name = "channel.simulated.sent",
            address,
            chars = text.chars().count(),
            "dry-run message recorded"
        );
        self.inner.sent.lock().await.push(SentMessage {
            address: address.to_owned(),
            text: text.to_owned(),
            sent_at: Utc::now(),
        });
        Ok(())
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) {
        self.inner.handlers.register(handler).await;
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.handlers.clear().await;
        Ok(())
    }
}
