use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ChannelError;

/// One message pushed by a counterparty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self { from: from.into(), body: body.into(), received_at: Utc::now() }
    }
}

/// Callback registered on a channel. May fire concurrently and in any order; implementations
/// must return quickly and must not fail the delivery path.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage);
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, address: &str, text: &str) -> Result<(), ChannelError>;

    /// Registers a handler for the lifetime of the channel.
    async fn listen(&self, handler: Arc<dyn InboundHandler>);

    async fn close(&self) -> Result<(), ChannelError>;
}

/// Handlers registered on one channel instance.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn InboundHandler>>>,
}

impl HandlerRegistry {
    pub async fn register(&self, handler: Arc<dyn InboundHandler>) {
        self.handlers.write().await.push(handler);
    }

    pub async fn clear(&self) {
        self.handlers.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fans the message out to every handler. Returns how many handlers saw it.
    pub async fn dispatch(&self, message: InboundMessage) -> usize {
        // Snapshot so a handler can register another one without deadlocking.
        let handlers = self.handlers.read().await.clone();
        for handler in &handlers {
            handler.on_message(message.clone()).await;
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::{HandlerRegistry, InboundHandler, InboundMessage};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<InboundMessage>>,
    }

    #[async_trait]
    impl InboundHandler for Recorder {
        async fn on_message(&self, message: InboundMessage) {
            self.seen.lock().await.push(message);
        }
    }

    #[tokio::test]
    async fn dispatch_reaches_every_registered_handler() {
        let registry = HandlerRegistry::default();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        registry.register(first.clone()).await;
        registry.register(second.clone()).await;

        let delivered = registry.dispatch(InboundMessage::new("+5567", "10,00")).await;

        assert_eq!(delivered, 2);
        assert_eq!(first.seen.lock().await.len(), 1);
        assert_eq!(second.seen.lock().await[0].body, "10,00");
    }

    #[tokio::test]
    async fn cleared_registry_drops_messages() {
        let registry = HandlerRegistry::default();
        registry.register(Arc::new(Recorder::default())).await;
        registry.clear().await;

        assert!(registry.is_empty().await);
        assert_eq!(registry.dispatch(InboundMessage::new("+1", "hi")).await, 0);
    }
}
