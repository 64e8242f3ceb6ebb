use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const NO_QUOTES_RECEIVED: &str = "No quotes received.";
pub const NO_COUNTERPARTIES_FOUND: &str = "No counterparties found for the requested items.";

/// Derived summary of a decision over received quote units. Never authoritative:
/// it can always be recomputed from the stored units.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub recommendation: String,
    pub best_counterparty: String,
    pub total_price: Decimal,
    pub table: String,
}

impl OutcomeRecord {
    pub fn no_quotes_received() -> Self {
        Self { recommendation: NO_QUOTES_RECEIVED.to_string(), ..Self::default() }
    }

    pub fn no_counterparties_found() -> Self {
        Self { recommendation: NO_COUNTERPARTIES_FOUND.to_string(), ..Self::default() }
    }

    /// True when the ranking produced nothing a caller could act on.
    pub fn is_empty(&self) -> bool {
        self.recommendation.trim().is_empty() && self.best_counterparty.trim().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: String,
    pub description: String,
    pub items: Vec<String>,
    pub chosen_counterparty: String,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn new(
        description: impl Into<String>,
        items: Vec<String>,
        outcome: &OutcomeRecord,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            items,
            chosen_counterparty: outcome.best_counterparty.clone(),
            total_price: outcome.total_price,
            created_at: Utc::now(),
        }
    }
}
