use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuoteRequestId(pub String);

impl std::fmt::Display for QuoteRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One requested line of a solicitation. Owned by its request; no identity of its own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: Decimal,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: Decimal, unit: impl Into<String>) -> Self {
        Self { name: name.into(), quantity, unit: unit.into(), note: None }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvariantViolation("line item name is empty".to_string()));
        }
        if self.quantity.is_sign_negative() && !self.quantity.is_zero() {
            return Err(DomainError::InvariantViolation(format!(
                "line item `{}` has negative quantity {}",
                self.name, self.quantity
            )));
        }
        Ok(())
    }

    /// Human-readable line such as `10 kg cement (CP-II)`.
    pub fn describe(&self) -> String {
        let mut line = format!("{} {} {}", self.quantity.normalize(), self.unit, self.name);
        if let Some(note) = self.note.as_deref().filter(|note| !note.trim().is_empty()) {
            line.push_str(&format!(" ({note})"));
        }
        line
    }
}

/// A batch solicitation. Immutable once persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub id: QuoteRequestId,
    pub description: String,
    pub items: Vec<LineItem>,
    pub urgent: bool,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl QuoteRequest {
    pub fn new(
        description: impl Into<String>,
        items: Vec<LineItem>,
        urgent: bool,
        timeout: Duration,
    ) -> Result<Self, DomainError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "quote request description is empty".to_string(),
            ));
        }
        for item in &items {
            item.validate()?;
        }

        Ok(Self {
            id: QuoteRequestId(Uuid::new_v4().to_string()),
            description,
            items,
            urgent,
            timeout_secs: timeout.as_secs(),
            created_at: Utc::now(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn item_names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }
}
