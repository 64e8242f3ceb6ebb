use serde::Serialize;

use crate::commands::{execution_failure, with_database, CommandResult};
use procura_core::domain::outcome::PurchaseRecord;
use procura_db::repositories::{PurchaseMemoryRepository, SqlPurchaseMemoryRepository};

pub const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Serialize)]
struct History {
    purchases: Vec<PurchaseRecord>,
}

/// Most recent purchase decisions, newest first.
pub fn run(last: u32) -> CommandResult {
    with_database("history", |_config, pool| async move {
        let purchases = SqlPurchaseMemoryRepository::new(pool)
            .recent(last.max(1))
            .await
            .map_err(|error| execution_failure("repository", error))?;

        let message = match purchases.first() {
            Some(latest) => format!(
                "{} purchases; latest: `{}` from {}",
                purchases.len(),
                latest.description,
                latest.chosen_counterparty
            ),
            None => "no purchases recorded yet".to_string(),
        };
        Ok(CommandResult::success_with("history", message, History { purchases }))
    })
}
