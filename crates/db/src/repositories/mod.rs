use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use procura_core::domain::counterparty::{Counterparty, CounterpartyId};
use procura_core::domain::outcome::PurchaseRecord;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId, QuoteUnitStatus};
use procura_core::domain::request::{QuoteRequest, QuoteRequestId};
use procura_core::errors::DomainError;

pub mod counterparty;
pub mod memory;
pub mod purchase;
pub mod quote_unit;
pub mod request;

pub use counterparty::SqlCounterpartyRepository;
pub use memory::{
    InMemoryCounterpartyRepository, InMemoryPurchaseMemoryRepository,
    InMemoryQuoteRequestRepository, InMemoryQuoteUnitRepository,
};
pub use purchase::SqlPurchaseMemoryRepository;
pub use quote_unit::SqlQuoteUnitRepository;
pub use request::SqlQuoteRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Append-only history of solicitations.
#[async_trait]
pub trait QuoteRequestRepository: Send + Sync {
    /// Rejects an id that already exists with [`RepositoryError::Conflict`].
    async fn save(&self, request: QuoteRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &QuoteRequestId)
        -> Result<Option<QuoteRequest>, RepositoryError>;
}

/// Store of correlation atoms. Each write is an independent atomic statement; there is no
/// transaction spanning dispatch, correlation and waiting.
#[async_trait]
pub trait QuoteUnitRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] when the (request, counterparty) pair
    /// already has a unit.
    async fn create(&self, unit: QuoteUnit) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &QuoteUnitId) -> Result<Option<QuoteUnit>, RepositoryError>;

    /// Units of one request in creation order.
    async fn list_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError>;

    /// Pending units of one counterparty, newest first.
    async fn list_pending_for_counterparty(
        &self,
        counterparty_id: &CounterpartyId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError>;

    /// Moves the counterparty's most recently created pending unit to `received`.
    /// Returns `None` when nothing was pending.
    async fn mark_received_latest_pending(
        &self,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError>;

    /// Moves one specific unit to `received` if it belongs to the counterparty and is still
    /// pending. Returns `None` otherwise.
    async fn mark_received(
        &self,
        unit_id: &QuoteUnitId,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError>;

    /// Applies a later-stage decision (`accepted`/`rejected`) following the unit's
    /// transition rules.
    async fn update_status(
        &self,
        unit_id: &QuoteUnitId,
        status: QuoteUnitStatus,
    ) -> Result<QuoteUnit, RepositoryError>;
}

#[async_trait]
pub trait CounterpartyRepository: Send + Sync {
    async fn add(&self, counterparty: Counterparty) -> Result<(), RepositoryError>;
    async fn get(&self, id: &CounterpartyId) -> Result<Option<Counterparty>, RepositoryError>;
    /// Resolves inactive counterparties too, so replies to units dispatched before a
    /// deactivation are still absorbed.
    async fn find_by_address(&self, address: &str)
        -> Result<Option<Counterparty>, RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Counterparty>, RepositoryError>;
    async fn by_category(&self, categories: &[String])
        -> Result<Vec<Counterparty>, RepositoryError>;
    async fn update_rating(&self, id: &CounterpartyId, rating: f64) -> Result<(), RepositoryError>;
    async fn deactivate(&self, id: &CounterpartyId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PurchaseMemoryRepository: Send + Sync {
    async fn save(&self, record: PurchaseRecord) -> Result<(), RepositoryError>;
    async fn recent(&self, limit: u32) -> Result<Vec<PurchaseRecord>, RepositoryError>;
    async fn last(&self) -> Result<Option<PurchaseRecord>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    value.parse::<Decimal>().map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

/// Turns a unique-constraint violation into a [`RepositoryError::Conflict`].
pub(crate) fn conflict_on_unique(error: sqlx::Error, message: impl FnOnce() -> String) -> RepositoryError {
    match &error {
        sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
            RepositoryError::Conflict(message())
        }
        _ => RepositoryError::Database(error),
    }
}
