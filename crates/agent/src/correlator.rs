use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use procura_channel::{InboundHandler, InboundMessage};
use procura_core::correlation::{CorrelationPolicy, CorrelationToken};
use procura_core::domain::counterparty::Counterparty;
use procura_core::domain::quote_unit::QuoteUnit;
use procura_core::price::parse_price;
use procura_db::repositories::{CounterpartyRepository, QuoteUnitRepository, RepositoryError};

use crate::signal::ReplySignal;

#[derive(Clone, Debug, PartialEq)]
pub enum CorrelationOutcome {
    /// Sender is not in the directory.
    Unknown,
    /// Sender is known but has nothing pending.
    NoPendingUnit,
    /// Sender is known but the reply could not be attributed under the active policy.
    Ignored(String),
    Received(QuoteUnit),
    /// Store failure; already logged.
    Failed(String),
}

/// Absorbs inbound replies into quote units. Never surfaces errors to the channel.
pub struct ResponseCorrelator {
    directory: Arc<dyn CounterpartyRepository>,
    units: Arc<dyn QuoteUnitRepository>,
    policy: CorrelationPolicy,
    signal: Option<ReplySignal>,
}

impl ResponseCorrelator {
    pub fn new(
        directory: Arc<dyn CounterpartyRepository>,
        units: Arc<dyn QuoteUnitRepository>,
        policy: CorrelationPolicy,
    ) -> Self {
        Self { directory, units, policy, signal: None }
    }

    pub fn with_signal(mut self, signal: ReplySignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub async fn handle_incoming(&self, from: &str, body: &str) -> CorrelationOutcome {
        self.handle_incoming_at(from, body, Utc::now()).await
    }

    pub async fn handle_incoming_at(
        &self,
        from: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> CorrelationOutcome {
        match self.correlate(from, body, at).await {
            Ok(outcome) => {
                if let CorrelationOutcome::Received(unit) = &outcome {
                    info!(
                        event_name = "engine.correlate.received",
                        request_id = %unit.request_id,
                        counterparty_id = %unit.counterparty_id,
                        quote_unit_id = %unit.id,
                        priced = unit.price.is_some(),
                        "reply recorded"
                    );
                    if let Some(signal) = &self.signal {
                        signal.notify();
                    }
                }
                outcome
            }
            Err(error) => {
                warn!(
                    event_name = "engine.correlate.store_failed",
                    from,
                    error = %error,
                    "could not record inbound reply"
                );
                CorrelationOutcome::Failed(error.to_string())
            }
        }
    }

    async fn correlate(
        &self,
        from: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<CorrelationOutcome, RepositoryError> {
        let Some(counterparty) = self.directory.find_by_address(from).await? else {
            debug!(event_name = "engine.correlate.unknown_sender", from, "ignoring unknown sender");
            return Ok(CorrelationOutcome::Unknown);
        };

        let price = parse_price(body);
        let updated = match self.policy {
            CorrelationPolicy::MostRecentPending => {
                self.units.mark_received_latest_pending(&counterparty.id, body, price, at).await?
            }
            CorrelationPolicy::Token => match self.token_target(&counterparty, body).await? {
                Ok(unit) => {
                    self.units.mark_received(&unit.id, &counterparty.id, body, price, at).await?
                }
                Err(reason) => {
                    info!(
                        event_name = "engine.correlate.ignored",
                        counterparty_id = %counterparty.id,
                        reason = %reason,
                        "reply not attributed"
                    );
                    return Ok(CorrelationOutcome::Ignored(reason));
                }
            },
        };

        Ok(match updated {
            Some(unit) => CorrelationOutcome::Received(unit),
            None => {
                info!(
                    event_name = "engine.correlate.no_pending_unit",
                    counterparty_id = %counterparty.id,
                    "reply from counterparty with nothing pending"
                );
                CorrelationOutcome::NoPendingUnit
            }
        })
    }

    /// Pending unit named by the reply's token, or the reason it cannot be attributed.
    async fn token_target(
        &self,
        counterparty: &Counterparty,
        body: &str,
    ) -> Result<Result<QuoteUnit, String>, RepositoryError> {
        let pending = self.units.list_pending_for_counterparty(&counterparty.id).await?;
        if pending.is_empty() {
            return Ok(Err("no pending quote unit".to_owned()));
        }
        let tokens = CorrelationToken::find_all_in(body);
        if tokens.is_empty() {
            return Ok(Err("reply carries no reference token".to_owned()));
        }

        let target = tokens
            .iter()
            .find_map(|token| pending.iter().find(|unit| token.matches(&unit.id)).cloned());
        Ok(target.ok_or_else(|| {
            let listed = tokens.iter().map(CorrelationToken::as_str).collect::<Vec<_>>().join(", ");
            format!("tokens {listed} match no pending quote unit")
        }))
    }
}

#[async_trait]
impl InboundHandler for ResponseCorrelator {
    async fn on_message(&self, message: InboundMessage) {
        self.handle_incoming_at(&message.from, &message.body, message.received_at).await;
    }
}
