use std::sync::Arc;

use tracing::{info, warn};

use procura_channel::MessageChannel;
use procura_core::correlation::{CorrelationPolicy, CorrelationToken};
use procura_core::domain::counterparty::Counterparty;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId};
use procura_core::domain::request::QuoteRequest;
use procura_db::repositories::QuoteUnitRepository;

use crate::assistant::QuoteAssistant;
use crate::error::EngineError;

/// Sends one solicitation per counterparty and records a pending unit for each send.
///
/// Stops at the first compose, send or persist failure. Units created for earlier
/// counterparties stay in the store; later counterparties are never contacted.
pub struct OutboundDispatcher {
    channel: Arc<dyn MessageChannel>,
    assistant: Arc<dyn QuoteAssistant>,
    units: Arc<dyn QuoteUnitRepository>,
    policy: CorrelationPolicy,
}

impl OutboundDispatcher {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        assistant: Arc<dyn QuoteAssistant>,
        units: Arc<dyn QuoteUnitRepository>,
        policy: CorrelationPolicy,
    ) -> Self {
        Self { channel, assistant, units, policy }
    }

    pub async fn dispatch(
        &self,
        request: &QuoteRequest,
        counterparties: &[Counterparty],
    ) -> Result<Vec<QuoteUnit>, EngineError> {
        let mut created = Vec::with_capacity(counterparties.len());

        for (position, counterparty) in counterparties.iter().enumerate() {
            let unit_id = QuoteUnitId::generate();
            let message =
                self.assistant.compose_message(request, counterparty).await.map_err(|source| {
                    warn!(
                        event_name = "engine.dispatch.compose_failed",
                        request_id = %request.id,
                        counterparty_id = %counterparty.id,
                        position,
                        error = %source,
                        "aborting dispatch"
                    );
                    EngineError::Compose { counterparty: counterparty.name.clone(), source }
                })?;
            let message = match self.policy {
                CorrelationPolicy::Token => CorrelationToken::for_unit(&unit_id).append_to(&message),
                CorrelationPolicy::MostRecentPending => message,
            };

            self.channel.send(&counterparty.address, &message).await.map_err(|source| {
                warn!(
                    event_name = "engine.dispatch.send_failed",
                    request_id = %request.id,
                    counterparty_id = %counterparty.id,
                    position,
                    error = %source,
                    "aborting dispatch"
                );
                EngineError::Send { counterparty: counterparty.name.clone(), source }
            })?;

            let unit = QuoteUnit::pending(
                unit_id,
                request.id.clone(),
                counterparty.id.clone(),
                request.items.clone(),
            );
            self.units.create(unit.clone()).await?;

            info!(
                event_name = "engine.dispatch.sent",
                request_id = %request.id,
                counterparty_id = %counterparty.id,
                quote_unit_id = %unit.id,
                "solicitation sent"
            );
            created.push(unit);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    use super::OutboundDispatcher;
    use crate::error::EngineError;
    use crate::heuristic::HeuristicAssistant;
    use procura_channel::{ChannelError, InboundHandler, MessageChannel, SimulatedChannel};
    use procura_core::correlation::{CorrelationPolicy, CorrelationToken};
    use procura_core::domain::counterparty::Counterparty;
    use procura_core::domain::quote_unit::QuoteUnitStatus;
    use procura_core::domain::request::{LineItem, QuoteRequest};
    use procura_db::repositories::{InMemoryQuoteUnitRepository, QuoteUnitRepository};

    /// Fails the n-th send (1-based) and records the successful ones.
    struct FailingOn {
        fail_at: usize,
        attempts: Mutex<usize>,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageChannel for FailingOn {
        async fn send(&self, address: &str, _text: &str) -> Result<(), ChannelError> {
            let mut attempts = self.attempts.lock().await;
            *attempts += 1;
            if *attempts == self.fail_at {
                return Err(ChannelError::Transport("socket reset".to_owned()));
            }
            self.delivered.lock().await.push(address.to_owned());
            Ok(())
        }

        async fn listen(&self, _handler: Arc<dyn InboundHandler>) {}

        async fn close(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn request() -> QuoteRequest {
        QuoteRequest::new(
            "10 bags of cement",
            vec![LineItem::new("cement", Decimal::new(10, 0), "bag")],
            false,
            Duration::from_secs(60),
        )
        .expect("request")
    }

    fn counterparties(count: usize) -> Vec<Counterparty> {
        (1..=count)
            .map(|n| {
                Counterparty::new(format!("Depot {n}"), &format!("+55670000{n:02}"), "local", [
                    "construction",
                ])
                .expect("counterparty")
            })
            .collect()
    }

    #[tokio::test]
    async fn creates_one_pending_unit_per_counterparty() {
        let channel = SimulatedChannel::new();
        let units = Arc::new(InMemoryQuoteUnitRepository::default());
        let dispatcher = OutboundDispatcher::new(
            Arc::new(channel.clone()),
            Arc::new(HeuristicAssistant::new()),
            units.clone(),
            CorrelationPolicy::MostRecentPending,
        );
        let request = request();
        let targets = counterparties(3);

        let created = dispatcher.dispatch(&request, &targets).await.expect("dispatch");

        assert_eq!(created.len(), 3);
        let stored = units.list_for_request(&request.id).await.expect("list");
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|unit| unit.status == QuoteUnitStatus::Pending));
        assert_eq!(channel.sent().await.len(), 3);
        assert_eq!(channel.sent().await[2].address, targets[2].address);
    }

    #[tokio::test]
    async fn aborts_on_first_send_failure() {
        let channel = Arc::new(FailingOn {
            fail_at: 2,
            attempts: Mutex::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let units = Arc::new(InMemoryQuoteUnitRepository::default());
        let dispatcher = OutboundDispatcher::new(
            channel.clone(),
            Arc::new(HeuristicAssistant::new()),
            units.clone(),
            CorrelationPolicy::MostRecentPending,
        );
        let request = request();
        let targets = counterparties(3);

        let error = dispatcher.dispatch(&request, &targets).await.expect_err("second send fails");

        assert!(matches!(error, EngineError::Send { ref counterparty, .. } if counterparty == "Depot 2"));
        assert_eq!(units.list_for_request(&request.id).await.expect("list").len(), 1);
        assert_eq!(*channel.attempts.lock().await, 2);
        assert_eq!(*channel.delivered.lock().await, vec![targets[0].address.clone()]);
    }

    #[tokio::test]
    async fn token_policy_appends_the_unit_reference() {
        let channel = SimulatedChannel::new();
        let dispatcher = OutboundDispatcher::new(
            Arc::new(channel.clone()),
            Arc::new(HeuristicAssistant::new()),
            Arc::new(InMemoryQuoteUnitRepository::default()),
            CorrelationPolicy::Token,
        );

        let created = dispatcher.dispatch(&request(), &counterparties(1)).await.expect("dispatch");

        let sent = channel.sent().await;
        let token = CorrelationToken::find_in(&sent[0].text).expect("token in outbound text");
        assert!(token.matches(&created[0].id));
    }
}
