use std::collections::BTreeSet;

use sqlx::Row;

use procura_core::domain::counterparty::{
    normalize_address, normalize_categories, Counterparty, CounterpartyId,
};

use super::{conflict_on_unique, decode_json, encode_json, CounterpartyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCounterpartyRepository {
    pool: DbPool,
}

impl SqlCounterpartyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_counterparty(row: &sqlx::sqlite::SqliteRow) -> Result<Counterparty, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let address: String =
        row.try_get("address").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let locality: String =
        row.try_get("locality").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let categories_json: String =
        row.try_get("categories").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let rating: f64 = row.try_get("rating").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: bool = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Counterparty {
        id: CounterpartyId(id),
        name,
        address,
        locality,
        categories: decode_json::<BTreeSet<String>>("categories", &categories_json)?,
        rating,
        active,
    })
}

#[async_trait::async_trait]
impl CounterpartyRepository for SqlCounterpartyRepository {
    async fn add(&self, counterparty: Counterparty) -> Result<(), RepositoryError> {
        let address = normalize_address(&counterparty.address);
        let categories = encode_json("categories", &counterparty.categories)?;

        sqlx::query(
            "INSERT INTO counterparties (id, name, address, locality, categories, rating, active)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&counterparty.id.0)
        .bind(&counterparty.name)
        .bind(&address)
        .bind(&counterparty.locality)
        .bind(categories)
        .bind(counterparty.rating)
        .bind(counterparty.active)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_on_unique(error, || {
                format!("a counterparty with id {} or address {address} already exists", counterparty.id)
            })
        })?;

        Ok(())
    }

    async fn get(&self, id: &CounterpartyId) -> Result<Option<Counterparty>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, address, locality, categories, rating, active
             FROM counterparties WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_counterparty).transpose()
    }

    async fn find_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Counterparty>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, address, locality, categories, rating, active
             FROM counterparties WHERE address = ?",
        )
        .bind(normalize_address(address))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_counterparty).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Counterparty>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, address, locality, categories, rating, active
             FROM counterparties WHERE active = 1 ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_counterparty).collect()
    }

    async fn by_category(
        &self,
        categories: &[String],
    ) -> Result<Vec<Counterparty>, RepositoryError> {
        // Categories are a JSON column, so filtering happens after the load.
        let wanted = normalize_categories(categories);
        let active = self.list_active().await?;
        Ok(active
            .into_iter()
            .filter(|counterparty| !counterparty.categories.is_disjoint(&wanted))
            .collect())
    }

    async fn update_rating(&self, id: &CounterpartyId, rating: f64) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE counterparties SET rating = ? WHERE id = ?")
            .bind(rating)
            .bind(&id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("counterparty {id}")));
        }
        Ok(())
    }

    async fn deactivate(&self, id: &CounterpartyId) -> Result<(), RepositoryError> {
        let updated = sqlx::query("UPDATE counterparties SET active = 0 WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("counterparty {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use procura_core::domain::counterparty::{Counterparty, CounterpartyId};

    use super::SqlCounterpartyRepository;
    use crate::repositories::{CounterpartyRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn counterparty(name: &str, address: &str, categories: &[&str]) -> Counterparty {
        Counterparty::new(name, address, "local", categories.iter().copied())
            .expect("counterparty")
    }

    #[tokio::test]
    async fn find_by_address_normalizes_formatting() {
        let repo = SqlCounterpartyRepository::new(setup_pool().await);
        let depot = counterparty("Depot", "+55 (67) 99999-0000", &["construction"]);
        repo.add(depot.clone()).await.expect("add");

        let found = repo
            .find_by_address("+5567999990000")
            .await
            .expect("lookup")
            .expect("resolved");
        assert_eq!(found.id, depot.id);
        assert!(found.categories.contains("construction"));

        assert!(repo.find_by_address("+5500000000").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn duplicate_address_is_a_conflict() {
        let repo = SqlCounterpartyRepository::new(setup_pool().await);
        repo.add(counterparty("First", "+551100000001", &["tools"])).await.expect("add");

        let error = repo
            .add(counterparty("Second", "+55 11 0000-0001", &["tools"]))
            .await
            .expect_err("same normalized address");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn inactive_counterparties_leave_listings_but_still_resolve() {
        let repo = SqlCounterpartyRepository::new(setup_pool().await);
        let zeta = counterparty("Zeta Supply", "+551100000001", &["construction"]);
        let alpha = counterparty("Alpha Supply", "+551100000002", &["construction", "tools"]);
        let meat = counterparty("Butcher", "+551100000003", &["meat"]);
        for entry in [zeta.clone(), alpha.clone(), meat.clone()] {
            repo.add(entry).await.expect("add");
        }

        let names: Vec<String> =
            repo.list_active().await.expect("list").into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Alpha Supply", "Butcher", "Zeta Supply"]);

        repo.deactivate(&zeta.id).await.expect("deactivate");
        let construction =
            repo.by_category(&["Construction".to_string()]).await.expect("by category");
        assert_eq!(construction.len(), 1);
        assert_eq!(construction[0].id, alpha.id);

        let resolved = repo.find_by_address(&zeta.address).await.expect("lookup").expect("found");
        assert!(!resolved.active);
    }

    #[tokio::test]
    async fn rating_updates_and_missing_ids() {
        let repo = SqlCounterpartyRepository::new(setup_pool().await);
        let depot = counterparty("Depot", "+551100000001", &["tools"]);
        repo.add(depot.clone()).await.expect("add");

        repo.update_rating(&depot.id, 4.5).await.expect("rate");
        let stored = repo.get(&depot.id).await.expect("get").expect("exists");
        assert!((stored.rating - 4.5).abs() < f64::EPSILON);

        let missing = repo.update_rating(&CounterpartyId("nope".to_string()), 1.0).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound(_))));
    }
}
