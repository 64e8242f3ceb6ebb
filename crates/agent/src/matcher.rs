use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use procura_core::domain::counterparty::Counterparty;
use procura_db::repositories::CounterpartyRepository;

use crate::assistant::QuoteAssistant;
use crate::error::EngineError;

#[derive(Clone, Debug, PartialEq)]
pub struct MatchedCounterparty {
    pub counterparty: Counterparty,
    pub reason: String,
}

/// Turns the assistant's suggestions into a clean, first-seen ordered list of directory
/// entries.
pub struct CounterpartyMatcher {
    directory: Arc<dyn CounterpartyRepository>,
    assistant: Arc<dyn QuoteAssistant>,
}

impl CounterpartyMatcher {
    pub fn new(
        directory: Arc<dyn CounterpartyRepository>,
        assistant: Arc<dyn QuoteAssistant>,
    ) -> Self {
        Self { directory, assistant }
    }

    pub async fn match_items(
        &self,
        items: &[String],
        locality: &str,
    ) -> Result<Vec<MatchedCounterparty>, EngineError> {
        let active = self.directory.list_active().await?;
        if active.is_empty() {
            debug!(event_name = "engine.match.empty_directory", "no active counterparties");
            return Ok(Vec::new());
        }

        let suggestions = self
            .assistant
            .match_counterparties(items, locality, &active)
            .await
            .map_err(|error| EngineError::assistant("counterparty matching", error))?;

        let index = active
            .iter()
            .map(|counterparty| (counterparty.id.0.as_str(), counterparty))
            .collect::<HashMap<_, _>>();
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        for suggestion in suggestions {
            let Some(counterparty) = index.get(suggestion.counterparty_id.as_str()) else {
                debug!(
                    event_name = "engine.match.unknown_id",
                    counterparty_id = %suggestion.counterparty_id,
                    "dropping suggestion absent from the directory"
                );
                continue;
            };
            if !seen.insert(suggestion.counterparty_id.clone()) {
                continue;
            }
            matched.push(MatchedCounterparty {
                counterparty: (*counterparty).clone(),
                reason: suggestion.reason,
            });
        }

        debug!(
            event_name = "engine.match.completed",
            matched = matched.len(),
            directory = active.len(),
            "counterparty matching finished"
        );
        Ok(matched)
    }
}
