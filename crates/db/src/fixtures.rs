use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Directory entries the seed fixture guarantees, used by [`SeedDirectory::verify`].
const SEED_COUNTERPARTIES: &[SeedCounterparty] = &[
    SeedCounterparty { id: "cp-seed-001", address: "+5567992740001", active: true },
    SeedCounterparty { id: "cp-seed-002", address: "+556733160002", active: true },
    SeedCounterparty { id: "cp-seed-003", address: "+556733040003", active: true },
    SeedCounterparty { id: "cp-seed-004", address: "+5567996440004", active: true },
    SeedCounterparty { id: "cp-seed-005", address: "+5567981610005", active: true },
    SeedCounterparty { id: "cp-seed-006", address: "+556733680006", active: true },
    SeedCounterparty { id: "cp-seed-007", address: "+556733480007", active: true },
    SeedCounterparty { id: "cp-seed-008", address: "+556733450008", active: true },
    SeedCounterparty { id: "cp-seed-009", address: "+556733000009", active: true },
    SeedCounterparty { id: "cp-seed-010", address: "+556733000010", active: false },
];

/// Sample counterparty directory for demos and dry runs.
///
/// Loading is idempotent: rows that already exist (by id or by address) are left alone.
pub struct SeedDirectory;

impl SeedDirectory {
    pub const SQL: &'static str = include_str!("../../../config/fixtures/seed_directory.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let before = Self::count(pool).await?;

        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let after = Self::count(pool).await?;
        let inserted = usize::try_from(after - before).unwrap_or_default();

        Ok(SeedResult {
            inserted,
            skipped: SEED_COUNTERPARTIES.len().saturating_sub(inserted),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_COUNTERPARTIES.len());

        for seed in SEED_COUNTERPARTIES {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM counterparties WHERE id = ?1 AND address = ?2 AND active = ?3)",
            )
            .bind(seed.id)
            .bind(seed.address)
            .bind(seed.active)
            .fetch_one(pool)
            .await?;
            checks.push((seed.id, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded rows. Counterparties referenced by quote units are kept.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for seed in SEED_COUNTERPARTIES {
            sqlx::query(
                "DELETE FROM counterparties
                 WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM quote_units WHERE counterparty_id = ?1)",
            )
            .bind(seed.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(pool: &DbPool) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(1) FROM counterparties").fetch_one(pool).await?)
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedCounterparty {
    id: &'static str,
    address: &'static str,
    active: bool,
}

#[derive(Debug)]
pub struct SeedResult {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
