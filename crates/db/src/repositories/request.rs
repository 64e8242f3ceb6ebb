use sqlx::Row;

use procura_core::domain::request::{LineItem, QuoteRequest, QuoteRequestId};

use super::{
    conflict_on_unique, decode_json, encode_json, format_timestamp, parse_timestamp,
    QuoteRequestRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlQuoteRequestRepository {
    pool: DbPool,
}

impl SqlQuoteRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<QuoteRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let items_json: String =
        row.try_get("items").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let urgent: bool = row.try_get("urgent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let timeout_secs: i64 =
        row.try_get("timeout_secs").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let timeout_secs = u64::try_from(timeout_secs).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `timeout_secs`: {timeout_secs}"))
    })?;

    Ok(QuoteRequest {
        id: QuoteRequestId(id),
        description,
        items: decode_json::<Vec<LineItem>>("items", &items_json)?,
        urgent,
        timeout_secs,
        created_at: parse_timestamp("created_at", created_at)?,
    })
}

#[async_trait::async_trait]
impl QuoteRequestRepository for SqlQuoteRequestRepository {
    async fn save(&self, request: QuoteRequest) -> Result<(), RepositoryError> {
        let items = encode_json("items", &request.items)?;
        let timeout_secs = i64::try_from(request.timeout_secs).map_err(|_| {
            RepositoryError::Decode(format!("timeout_secs out of range: {}", request.timeout_secs))
        })?;

        sqlx::query(
            "INSERT INTO quote_requests (id, description, items, urgent, timeout_secs, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.description)
        .bind(items)
        .bind(request.urgent)
        .bind(timeout_secs)
        .bind(format_timestamp(&request.created_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_on_unique(error, || format!("quote request {} already exists", request.id))
        })?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &QuoteRequestId,
    ) -> Result<Option<QuoteRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, description, items, urgent, timeout_secs, created_at
             FROM quote_requests WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_request).transpose()
    }
}
