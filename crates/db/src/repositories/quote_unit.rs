use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use procura_core::domain::counterparty::CounterpartyId;
use procura_core::domain::quote_unit::{QuoteUnit, QuoteUnitId, QuoteUnitStatus};
use procura_core::domain::request::{LineItem, QuoteRequestId};
use procura_core::errors::DomainError;

use super::{
    conflict_on_unique, decode_json, encode_json, format_timestamp, parse_decimal,
    parse_optional_timestamp, parse_timestamp, QuoteUnitRepository, RepositoryError,
};
use crate::DbPool;

const UNIT_COLUMNS: &str = "id, request_id, counterparty_id, items, response, price, status, \
                            created_at, responded_at";

pub struct SqlQuoteUnitRepository {
    pool: DbPool,
}

impl SqlQuoteUnitRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_unit(row: &sqlx::sqlite::SqliteRow) -> Result<QuoteUnit, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: String =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let counterparty_id: String =
        row.try_get("counterparty_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let items_json: String =
        row.try_get("items").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let response: Option<String> =
        row.try_get("response").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let price: Option<String> =
        row.try_get("price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let responded_at: Option<String> =
        row.try_get("responded_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let status = QuoteUnitStatus::parse(&status).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown quote unit status `{status}`"))
    })?;

    Ok(QuoteUnit {
        id: QuoteUnitId(id),
        request_id: QuoteRequestId(request_id),
        counterparty_id: CounterpartyId(counterparty_id),
        items: decode_json::<Vec<LineItem>>("items", &items_json)?,
        response,
        price: price.as_deref().map(|value| parse_decimal("price", value)).transpose()?,
        status,
        created_at: parse_timestamp("created_at", created_at)?,
        responded_at: parse_optional_timestamp("responded_at", responded_at)?,
    })
}

#[async_trait::async_trait]
impl QuoteUnitRepository for SqlQuoteUnitRepository {
    async fn create(&self, unit: QuoteUnit) -> Result<(), RepositoryError> {
        let items = encode_json("items", &unit.items)?;

        sqlx::query(
            "INSERT INTO quote_units
                (id, request_id, counterparty_id, items, response, price, status, created_at, responded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&unit.id.0)
        .bind(&unit.request_id.0)
        .bind(&unit.counterparty_id.0)
        .bind(items)
        .bind(&unit.response)
        .bind(unit.price.map(|price| price.to_string()))
        .bind(unit.status.as_str())
        .bind(format_timestamp(&unit.created_at))
        .bind(unit.responded_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_on_unique(error, || {
                format!(
                    "quote unit for request {} and counterparty {} already exists",
                    unit.request_id, unit.counterparty_id
                )
            })
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &QuoteUnitId) -> Result<Option<QuoteUnit>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM quote_units WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn list_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM quote_units
             WHERE request_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_unit).collect()
    }

    async fn list_pending_for_counterparty(
        &self,
        counterparty_id: &CounterpartyId,
    ) -> Result<Vec<QuoteUnit>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM quote_units
             WHERE counterparty_id = ? AND status = 'pending'
             ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(&counterparty_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_unit).collect()
    }

    async fn mark_received_latest_pending(
        &self,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE quote_units
             SET status = 'received', response = ?, price = ?, responded_at = ?
             WHERE status = 'pending'
               AND id = (
                   SELECT id FROM quote_units
                   WHERE counterparty_id = ? AND status = 'pending'
                   ORDER BY created_at DESC, rowid DESC
                   LIMIT 1
               )
             RETURNING {UNIT_COLUMNS}"
        ))
        .bind(response)
        .bind(price.map(|price| price.to_string()))
        .bind(format_timestamp(&at))
        .bind(&counterparty_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn mark_received(
        &self,
        unit_id: &QuoteUnitId,
        counterparty_id: &CounterpartyId,
        response: &str,
        price: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<Option<QuoteUnit>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE quote_units
             SET status = 'received', response = ?, price = ?, responded_at = ?
             WHERE id = ? AND counterparty_id = ? AND status = 'pending'
             RETURNING {UNIT_COLUMNS}"
        ))
        .bind(response)
        .bind(price.map(|price| price.to_string()))
        .bind(format_timestamp(&at))
        .bind(&unit_id.0)
        .bind(&counterparty_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_unit).transpose()
    }

    async fn update_status(
        &self,
        unit_id: &QuoteUnitId,
        status: QuoteUnitStatus,
    ) -> Result<QuoteUnit, RepositoryError> {
        let mut unit = self
            .find_by_id(unit_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("quote unit {unit_id}")))?;
        let previous = unit.status;
        unit.transition_to(status)?;

        let updated = sqlx::query("UPDATE quote_units SET status = ? WHERE id = ? AND status = ?")
            .bind(status.as_str())
            .bind(&unit_id.0)
            .bind(previous.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::Domain(DomainError::InvariantViolation(format!(
                "quote unit {unit_id} changed status concurrently"
            ))));
        }

        Ok(unit)
    }
}
