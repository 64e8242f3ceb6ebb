use sqlx::Row;

use procura_core::domain::outcome::PurchaseRecord;

use super::{
    decode_json, encode_json, format_timestamp, parse_decimal, parse_timestamp,
    PurchaseMemoryRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlPurchaseMemoryRepository {
    pool: DbPool,
}

impl SqlPurchaseMemoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<PurchaseRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let items_json: String =
        row.try_get("items").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let chosen_counterparty: String =
        row.try_get("chosen_counterparty").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let total_price: String =
        row.try_get("total_price").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(PurchaseRecord {
        id,
        description,
        items: decode_json("items", &items_json)?,
        chosen_counterparty,
        total_price: parse_decimal("total_price", &total_price)?,
        created_at: parse_timestamp("created_at", created_at)?,
    })
}

#[async_trait::async_trait]
impl PurchaseMemoryRepository for SqlPurchaseMemoryRepository {
    async fn save(&self, record: PurchaseRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO purchase_memory
                (id, description, items, chosen_counterparty, total_price, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.description)
        .bind(encode_json("items", &record.items)?)
        .bind(&record.chosen_counterparty)
        .bind(record.total_price.to_string())
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<PurchaseRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, description, items, chosen_counterparty, total_price, created_at
             FROM purchase_memory
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn last(&self) -> Result<Option<PurchaseRecord>, RepositoryError> {
        Ok(self.recent(1).await?.into_iter().next())
    }
}
