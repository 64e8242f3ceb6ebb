use async_trait::async_trait;
use tracing::info;

use procura_core::config::{AssistantBackendKind, AssistantConfig};
use procura_core::domain::counterparty::Counterparty;
use procura_core::domain::request::{LineItem, QuoteRequest};

use crate::assistant::{LlmAssistant, MatchSuggestion, QuoteAssistant, RankedOutcome, ReceivedQuote};
use crate::error::AssistantError;
use crate::heuristic::HeuristicAssistant;
use crate::llm::AnthropicClient;

/// Assistant variant chosen once at startup.
pub enum AssistantBackend {
    Heuristic(HeuristicAssistant),
    Anthropic(LlmAssistant<AnthropicClient>),
}

impl AssistantBackend {
    pub fn from_config(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let backend = match config.backend {
            AssistantBackendKind::Heuristic => Self::Heuristic(HeuristicAssistant::new()),
            AssistantBackendKind::Anthropic => {
                Self::Anthropic(LlmAssistant::new(AnthropicClient::from_config(config)?))
            }
        };
        info!(
            event_name = "assistant.backend.selected",
            backend = config.backend.as_str(),
            "assistant ready"
        );
        Ok(backend)
    }

    pub fn kind(&self) -> AssistantBackendKind {
        match self {
            Self::Heuristic(_) => AssistantBackendKind::Heuristic,
            Self::Anthropic(_) => AssistantBackendKind::Anthropic,
        }
    }
}

#[async_trait]
impl QuoteAssistant for AssistantBackend {
    async fn extract_items(&self, description: &str) -> Result<Vec<LineItem>, AssistantError> {
        match self {
            Self::Heuristic(assistant) => assistant.extract_items(description).await,
            Self::Anthropic(assistant) => assistant.extract_items(description).await,
        }
    }

    async fn match_counterparties(
        &self,
        items: &[String],
        locality: &str,
        directory: &[Counterparty],
    ) -> Result<Vec<MatchSuggestion>, AssistantError> {
        match self {
            Self::Heuristic(assistant) => {
                assistant.match_counterparties(items, locality, directory).await
            }
            Self::Anthropic(assistant) => {
                assistant.match_counterparties(items, locality, directory).await
            }
        }
    }

    async fn compose_message(
        &self,
        request: &QuoteRequest,
        counterparty: &Counterparty,
    ) -> Result<String, AssistantError> {
        match self {
            Self::Heuristic(assistant) => assistant.compose_message(request, counterparty).await,
            Self::Anthropic(assistant) => assistant.compose_message(request, counterparty).await,
        }
    }

    async fn rank_quotes(
        &self,
        request: &QuoteRequest,
        received: &[ReceivedQuote],
    ) -> Result<RankedOutcome, AssistantError> {
        match self {
            Self::Heuristic(assistant) => assistant.rank_quotes(request, received).await,
            Self::Anthropic(assistant) => assistant.rank_quotes(request, received).await,
        }
    }
}
