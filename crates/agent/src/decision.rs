use std::sync::Arc;

use tracing::{info, warn};

use procura_core::domain::outcome::OutcomeRecord;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitStatus};
use procura_core::domain::request::QuoteRequest;
use procura_db::repositories::CounterpartyRepository;

use crate::assistant::{QuoteAssistant, RankedOutcome, ReceivedQuote};
use crate::error::EngineError;

/// Hands the received replies to the ranking capability and always produces a
/// well-formed outcome from whatever it returns.
pub struct DecisionStep {
    assistant: Arc<dyn QuoteAssistant>,
    directory: Arc<dyn CounterpartyRepository>,
}

impl DecisionStep {
    pub fn new(
        assistant: Arc<dyn QuoteAssistant>,
        directory: Arc<dyn CounterpartyRepository>,
    ) -> Self {
        Self { assistant, directory }
    }

    pub async fn decide(
        &self,
        request: &QuoteRequest,
        received: &[QuoteUnit],
    ) -> Result<OutcomeRecord, EngineError> {
        let received =
            received.iter().filter(|unit| unit.status == QuoteUnitStatus::Received).collect::<Vec<_>>();
        if received.is_empty() {
            info!(event_name = "engine.decide.no_quotes", request_id = %request.id, "nothing to rank");
            return Ok(OutcomeRecord::no_quotes_received());
        }

        let mut quotes = Vec::with_capacity(received.len());
        for unit in received {
            let name = self
                .directory
                .get(&unit.counterparty_id)
                .await?
                .map(|counterparty| counterparty.name)
                .unwrap_or_else(|| unit.counterparty_id.0.clone());
            quotes.push(ReceivedQuote::new(unit, name));
        }

        let ranked = self
            .assistant
            .rank_quotes(request, &quotes)
            .await
            .map_err(|error| EngineError::assistant("quote ranking", error))?;
        let outcome = into_outcome(ranked);

        if outcome.is_empty() {
            warn!(
                event_name = "engine.decide.empty_result",
                request_id = %request.id,
                received = quotes.len(),
                "ranking produced no usable recommendation"
            );
        } else {
            info!(
                event_name = "engine.decide.completed",
                request_id = %request.id,
                received = quotes.len(),
                best_counterparty = %outcome.best_counterparty,
                "decision ready"
            );
        }
        Ok(outcome)
    }
}

fn into_outcome(ranked: RankedOutcome) -> OutcomeRecord {
    OutcomeRecord {
        recommendation: ranked.recommendation.unwrap_or_default().trim().to_owned(),
        best_counterparty: ranked.best_counterparty.unwrap_or_default().trim().to_owned(),
        total_price: ranked.total_price.unwrap_or_default(),
        table: ranked.table.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::DecisionStep;
    use serde_json::{json, Value};

    use crate::assistant::{
        LlmAssistant, MatchSuggestion, QuoteAssistant, RankedOutcome, ReceivedQuote,
    };
    use crate::error::{AssistantError, EngineError};
    use crate::llm::{LlmClient, ToolInvocation};
    use procura_core::domain::counterparty::Counterparty;
    use procura_core::domain::outcome::{OutcomeRecord, NO_QUOTES_RECEIVED};
    use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId};
    use procura_core::domain::request::{LineItem, QuoteRequest};
    use procura_db::repositories::InMemoryCounterpartyRepository;

    struct ScriptedRanking {
        result: Result<RankedOutcome, AssistantError>,
        calls: AtomicUsize,
        seen_names: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedRanking {
        fn new(result: Result<RankedOutcome, AssistantError>) -> Self {
            Self { result, calls: AtomicUsize::new(0), seen_names: Default::default() }
        }
    }

    #[async_trait]
    impl QuoteAssistant for ScriptedRanking {
        async fn extract_items(&self, _: &str) -> Result<Vec<LineItem>, AssistantError> {
            Ok(Vec::new())
        }

        async fn match_counterparties(
            &self,
            _: &[String],
            _: &str,
            _: &[Counterparty],
        ) -> Result<Vec<MatchSuggestion>, AssistantError> {
            Ok(Vec::new())
        }

        async fn compose_message(
            &self,
            _: &QuoteRequest,
            _: &Counterparty,
        ) -> Result<String, AssistantError> {
            Ok(String::new())
        }

        async fn rank_quotes(
            &self,
            _: &QuoteRequest,
            received: &[ReceivedQuote],
        ) -> Result<RankedOutcome, AssistantError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut names) = self.seen_names.lock() {
                names.extend(received.iter().map(|quote| quote.counterparty.clone()));
            }
            self.result.clone()
        }
    }

    fn request() -> QuoteRequest {
        QuoteRequest::new("cement", Vec::new(), false, Duration::from_secs(60)).expect("request")
    }

    fn received_from(counterparty: &Counterparty) -> QuoteUnit {
        let mut unit = QuoteUnit::pending(
            QuoteUnitId::generate(),
            request().id,
            counterparty.id.clone(),
            Vec::new(),
        );
        unit.record_response("R$ 10,00", Some(Decimal::new(1000, 2)), Utc::now()).expect("reply");
        unit
    }

    fn depot() -> Counterparty {
        Counterparty::new("Depot", "+5567000001", "local", ["construction"]).expect("counterparty")
    }

    #[tokio::test]
    async fn no_received_units_skip_the_ranking_call() {
        let assistant = Arc::new(ScriptedRanking::new(Ok(RankedOutcome::default())));
        let step =
            DecisionStep::new(assistant.clone(), Arc::new(InMemoryCounterpartyRepository::default()));

        let outcome = step.decide(&request(), &[]).await.expect("decide");

        assert_eq!(outcome.recommendation, NO_QUOTES_RECEIVED);
        assert_eq!(assistant.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ranking_sees_counterparty_names() {
        let depot = depot();
        let assistant = Arc::new(ScriptedRanking::new(Ok(RankedOutcome {
            recommendation: Some("Buy from Depot".to_owned()),
            best_counterparty: Some("Depot".to_owned()),
            total_price: Some(Decimal::new(1000, 2)),
            table: Some("Depot | 10.00".to_owned()),
        })));
        let step = DecisionStep::new(
            assistant.clone(),
            Arc::new(InMemoryCounterpartyRepository::with_counterparties([depot.clone()])),
        );

        let outcome = step.decide(&request(), &[received_from(&depot)]).await.expect("decide");

        assert_eq!(outcome.best_counterparty, "Depot");
        assert_eq!(outcome.total_price, Decimal::new(1000, 2));
        assert_eq!(*assistant.seen_names.lock().expect("names"), vec!["Depot".to_owned()]);
    }

    #[tokio::test]
    async fn empty_ranking_is_a_well_formed_outcome() {
        let depot = depot();
        let step = DecisionStep::new(
            Arc::new(ScriptedRanking::new(Ok(RankedOutcome::default()))),
            Arc::new(InMemoryCounterpartyRepository::with_counterparties([depot.clone()])),
        );

        let outcome = step.decide(&request(), &[received_from(&depot)]).await.expect("decide");

        assert_eq!(outcome, OutcomeRecord::default());
        assert!(outcome.is_empty());
    }

    struct GarbledRanker;

    #[async_trait]
    impl LlmClient for GarbledRanker {
        async fn invoke_tool(&self, _: ToolInvocation) -> Result<Option<Value>, AssistantError> {
            Ok(Some(json!({
                "recommendation": "Depot is cheapest",
                "best_counterparty": ["Depot"],
                "total_price": "R$ 320,00",
                "table": 7
            })))
        }
    }

    #[tokio::test]
    async fn malformed_ranking_fields_still_yield_an_outcome() {
        let depot = depot();
        let step = DecisionStep::new(
            Arc::new(LlmAssistant::new(GarbledRanker)),
            Arc::new(InMemoryCounterpartyRepository::with_counterparties([depot.clone()])),
        );

        let outcome = step.decide(&request(), &[received_from(&depot)]).await.expect("decide");

        assert_eq!(outcome.recommendation, "Depot is cheapest");
        assert_eq!(outcome.best_counterparty, "");
        assert_eq!(outcome.total_price, Decimal::new(32000, 2));
        assert_eq!(outcome.table, "");
    }

    #[tokio::test]
    async fn ranking_failure_propagates_with_context() {
        let depot = depot();
        let step = DecisionStep::new(
            Arc::new(ScriptedRanking::new(Err(AssistantError::Transport("reset".to_owned())))),
            Arc::new(InMemoryCounterpartyRepository::with_counterparties([depot.clone()])),
        );

        let error = step.decide(&request(), &[received_from(&depot)]).await.expect_err("fails");
        assert!(matches!(error, EngineError::Assistant { stage: "quote ranking", .. }));
    }
}
