use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use procura_channel::MessageChannel;
use procura_core::config::EngineConfig;
use procura_core::correlation::CorrelationPolicy;
use procura_core::domain::counterparty::Counterparty;
use procura_core::domain::outcome::{OutcomeRecord, PurchaseRecord};
use procura_core::domain::quote_unit::QuoteUnit;
use procura_core::domain::request::{QuoteRequest, QuoteRequestId};
use procura_core::errors::DomainError;
use procura_db::repositories::{
    CounterpartyRepository, PurchaseMemoryRepository, QuoteRequestRepository, QuoteUnitRepository,
    SqlCounterpartyRepository, SqlPurchaseMemoryRepository, SqlQuoteRequestRepository,
    SqlQuoteUnitRepository,
};
use procura_db::DbPool;

use crate::assistant::QuoteAssistant;
use crate::correlator::ResponseCorrelator;
use crate::decision::DecisionStep;
use crate::dispatcher::OutboundDispatcher;
use crate::error::EngineError;
use crate::matcher::{CounterpartyMatcher, MatchedCounterparty};
use crate::signal::ReplySignal;
use crate::wait::WaitScheduler;

/// Timing and policy of one workflow instance.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowSettings {
    pub locality: String,
    pub quote_timeout: Duration,
    pub urgent_timeout: Duration,
    pub poll_interval: Duration,
    pub correlation_policy: CorrelationPolicy,
    pub notify_on_reply: bool,
}

impl WorkflowSettings {
    pub fn timeout_for(&self, urgent: bool) -> Duration {
        if urgent {
            self.urgent_timeout
        } else {
            self.quote_timeout
        }
    }
}

impl From<&EngineConfig> for WorkflowSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            locality: config.locality.clone(),
            quote_timeout: config.quote_timeout(),
            urgent_timeout: config.urgent_timeout(),
            poll_interval: config.poll_interval(),
            correlation_policy: config.correlation_policy,
            notify_on_reply: config.notify_on_reply,
        }
    }
}

/// Repositories the workflow reads and writes.
#[derive(Clone)]
pub struct EngineStores {
    pub requests: Arc<dyn QuoteRequestRepository>,
    pub units: Arc<dyn QuoteUnitRepository>,
    pub directory: Arc<dyn CounterpartyRepository>,
    pub purchases: Arc<dyn PurchaseMemoryRepository>,
}

impl EngineStores {
    /// SQL-backed stores sharing one pool.
    pub fn sql(pool: DbPool) -> Self {
        Self {
            requests: Arc::new(SqlQuoteRequestRepository::new(pool.clone())),
            units: Arc::new(SqlQuoteUnitRepository::new(pool.clone())),
            directory: Arc::new(SqlCounterpartyRepository::new(pool.clone())),
            purchases: Arc::new(SqlPurchaseMemoryRepository::new(pool)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteCommand {
    pub description: String,
    pub urgent: bool,
    /// `false` dispatches and returns without waiting (dry run).
    pub wait: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    NoCounterparties {
        request: QuoteRequest,
    },
    Dispatched {
        request: QuoteRequest,
        units: Vec<QuoteUnit>,
        would_wait: Duration,
    },
    Decided {
        request: QuoteRequest,
        outcome: OutcomeRecord,
        received: Vec<QuoteUnit>,
        still_pending: Vec<QuoteUnit>,
        timed_out: bool,
    },
}

impl WorkflowOutcome {
    pub fn request(&self) -> &QuoteRequest {
        match self {
            Self::NoCounterparties { request }
            | Self::Dispatched { request, .. }
            | Self::Decided { request, .. } => request,
        }
    }

    /// Outcome record to present. A dispatch without a wait has nothing to decide yet.
    pub fn outcome(&self) -> Option<OutcomeRecord> {
        match self {
            Self::NoCounterparties { .. } => Some(OutcomeRecord::no_counterparties_found()),
            Self::Dispatched { .. } => None,
            Self::Decided { outcome, .. } => Some(outcome.clone()),
        }
    }
}

/// Orchestrates extract, match, dispatch, wait and decide for one request at a time.
/// Immutable after construction; build a new instance to change configuration.
pub struct QuoteWorkflow {
    settings: WorkflowSettings,
    stores: EngineStores,
    assistant: Arc<dyn QuoteAssistant>,
    signal: ReplySignal,
    matcher: CounterpartyMatcher,
    dispatcher: OutboundDispatcher,
    waiter: WaitScheduler,
    decision: DecisionStep,
}

impl QuoteWorkflow {
    pub fn new(
        settings: WorkflowSettings,
        stores: EngineStores,
        assistant: Arc<dyn QuoteAssistant>,
        channel: Arc<dyn MessageChannel>,
    ) -> Self {
        let signal = ReplySignal::new();
        let matcher = CounterpartyMatcher::new(stores.directory.clone(), assistant.clone());
        let dispatcher = OutboundDispatcher::new(
            channel,
            assistant.clone(),
            stores.units.clone(),
            settings.correlation_policy,
        );
        let mut waiter = WaitScheduler::new(stores.units.clone(), settings.poll_interval);
        if settings.notify_on_reply {
            waiter = waiter.with_signal(signal.clone());
        }
        let decision = DecisionStep::new(assistant.clone(), stores.directory.clone());

        Self { settings, stores, assistant, signal, matcher, dispatcher, waiter, decision }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Correlator sharing this workflow's stores, policy and wake-up signal. Register it on
    /// the channel with `listen`.
    pub fn correlator(&self) -> ResponseCorrelator {
        ResponseCorrelator::new(
            self.stores.directory.clone(),
            self.stores.units.clone(),
            self.settings.correlation_policy,
        )
        .with_signal(self.signal.clone())
    }

    pub async fn run(&self, command: QuoteCommand) -> Result<WorkflowOutcome, EngineError> {
        let request = self.prepare(&command.description, command.urgent).await?;
        self.execute(request, command.wait).await
    }

    /// Extracts items and persists the request. Nothing is sent yet.
    pub async fn prepare(
        &self,
        description: &str,
        urgent: bool,
    ) -> Result<QuoteRequest, EngineError> {
        if description.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "quote request description must not be empty".to_owned(),
            )
            .into());
        }
        let items = self
            .assistant
            .extract_items(description)
            .await
            .map_err(|error| EngineError::assistant("item extraction", error))?;
        let request =
            QuoteRequest::new(description, items, urgent, self.settings.timeout_for(urgent))?;
        self.stores.requests.save(request.clone()).await?;

        info!(
            event_name = "engine.request.created",
            request_id = %request.id,
            items = request.items.len(),
            urgent,
            "quote request persisted"
        );
        Ok(request)
    }

    /// Matches, dispatches and (when `wait`) waits and decides for a persisted request.
    pub async fn execute(
        &self,
        request: QuoteRequest,
        wait: bool,
    ) -> Result<WorkflowOutcome, EngineError> {
        let matched = self.match_request(&request).await?;
        if matched.is_empty() {
            info!(
                event_name = "engine.match.none",
                request_id = %request.id,
                "no counterparties matched"
            );
            return Ok(WorkflowOutcome::NoCounterparties { request });
        }

        let targets =
            matched.into_iter().map(|matched| matched.counterparty).collect::<Vec<Counterparty>>();
        let units = self.dispatcher.dispatch(&request, &targets).await?;
        let deadline = self.settings.timeout_for(request.urgent);

        if !wait {
            return Ok(WorkflowOutcome::Dispatched { would_wait: deadline, request, units });
        }

        let snapshot = self.waiter.wait_for(&request.id, units.len(), deadline).await?;
        let outcome = self.decision.decide(&request, &snapshot.received).await?;
        self.remember(&request, &snapshot.received, &outcome).await;

        Ok(WorkflowOutcome::Decided {
            still_pending: snapshot.still_pending(),
            received: snapshot.received,
            timed_out: snapshot.timed_out,
            outcome,
            request,
        })
    }

    pub async fn match_request(
        &self,
        request: &QuoteRequest,
    ) -> Result<Vec<MatchedCounterparty>, EngineError> {
        self.matcher.match_items(&request.item_names(), &self.settings.locality).await
    }

    /// Rebuilds the outcome from whatever units are stored right now.
    pub async fn recompute_outcome(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<OutcomeRecord, EngineError> {
        let request = self
            .stores
            .requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| EngineError::RequestNotFound(request_id.0.clone()))?;
        let units = self.stores.units.list_for_request(request_id).await?;
        self.decision.decide(&request, &units).await
    }

    /// Quotes the most recent purchase description again. `None` when there is no history.
    pub async fn repeat_last(
        &self,
        urgent: bool,
        wait: bool,
    ) -> Result<Option<WorkflowOutcome>, EngineError> {
        let Some(last) = self.stores.purchases.last().await? else {
            return Ok(None);
        };
        info!(event_name = "engine.repeat.started", purchase_id = %last.id, "repeating last purchase");
        self.run(QuoteCommand { description: last.description, urgent, wait }).await.map(Some)
    }

    async fn remember(&self, request: &QuoteRequest, received: &[QuoteUnit], outcome: &OutcomeRecord) {
        if received.is_empty() || outcome.best_counterparty.trim().is_empty() {
            return;
        }
        let record = PurchaseRecord::new(&request.description, request.item_names(), outcome);
        if let Err(error) = self.stores.purchases.save(record).await {
            warn!(
                event_name = "engine.memory.save_failed",
                request_id = %request.id,
                error = %error,
                "purchase memory not updated"
            );
        }
    }
}
