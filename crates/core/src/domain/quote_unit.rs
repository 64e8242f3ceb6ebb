use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::counterparty::CounterpartyId;
use crate::domain::request::{LineItem, QuoteRequestId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteUnitId(pub String);

impl QuoteUnitId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for QuoteUnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteUnitStatus {
    Pending,
    Received,
    Accepted,
    Rejected,
}

impl QuoteUnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Received => "received",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "received" => Some(Self::Received),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Anything but `Pending` ends the wait for that unit.
    pub fn is_terminal_for_wait(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Per-counterparty correlation record: one outbound solicitation and its reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteUnit {
    pub id: QuoteUnitId,
    pub request_id: QuoteRequestId,
    pub counterparty_id: CounterpartyId,
    pub items: Vec<LineItem>,
    pub response: Option<String>,
    pub price: Option<Decimal>,
    pub status: QuoteUnitStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl QuoteUnit {
    pub fn pending(
        id: QuoteUnitId,
        request_id: QuoteRequestId,
        counterparty_id: CounterpartyId,
        items: Vec<LineItem>,
    ) -> Self {
        Self {
            id,
            request_id,
            counterparty_id,
            items,
            response: None,
            price: None,
            status: QuoteUnitStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    pub fn can_transition_to(&self, next: QuoteUnitStatus) -> bool {
        matches!(
            (self.status, next),
            (QuoteUnitStatus::Pending, QuoteUnitStatus::Received)
                | (QuoteUnitStatus::Received, QuoteUnitStatus::Accepted)
                | (QuoteUnitStatus::Received, QuoteUnitStatus::Rejected)
        )
    }

    pub fn transition_to(&mut self, next: QuoteUnitStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuoteUnitTransition { from: self.status, to: next })
    }

    /// Applies an inbound reply. Only a pending unit can absorb one.
    pub fn record_response(
        &mut self,
        response: impl Into<String>,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(QuoteUnitStatus::Received)?;
        self.response = Some(response.into());
        self.price = price;
        self.responded_at = Some(at);
        Ok(())
    }

    pub fn is_received(&self) -> bool {
        self.status == QuoteUnitStatus::Received
    }
}
