use serde::Serialize;

use crate::commands::{execution_failure, with_database, CommandResult, Failure, EXIT_CONFIG};
use procura_core::domain::counterparty::{Counterparty, CounterpartyId};
use procura_db::repositories::{CounterpartyRepository, RepositoryError, SqlCounterpartyRepository};

#[derive(Debug, Clone)]
pub struct NewCounterparty {
    pub name: String,
    pub address: String,
    pub locality: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Listing {
    count: usize,
    counterparties: Vec<Counterparty>,
}

pub fn add(input: NewCounterparty) -> CommandResult {
    let counterparty =
        match Counterparty::new(input.name, &input.address, input.locality, &input.categories) {
            Ok(counterparty) => counterparty,
            Err(error) => {
                return CommandResult::failure(
                    "counterparties.add",
                    "invalid_input",
                    error.to_string(),
                    EXIT_CONFIG,
                )
            }
        };

    with_database("counterparties.add", |_config, pool| async move {
        let directory = SqlCounterpartyRepository::new(pool);
        directory.add(counterparty.clone()).await.map_err(repository_failure)?;
        Ok(CommandResult::success_with(
            "counterparties.add",
            format!("added counterparty `{}` ({})", counterparty.name, counterparty.id),
            counterparty,
        ))
    })
}

/// Active counterparties, optionally restricted to some categories.
pub fn list(categories: Vec<String>) -> CommandResult {
    with_database("counterparties.list", |_config, pool| async move {
        let directory = SqlCounterpartyRepository::new(pool);
        let counterparties = if categories.is_empty() {
            directory.list_active().await
        } else {
            directory.by_category(&categories).await
        }
        .map_err(repository_failure)?;

        Ok(CommandResult::success_with(
            "counterparties.list",
            format!("{} active counterparties", counterparties.len()),
            Listing { count: counterparties.len(), counterparties },
        ))
    })
}

pub fn rate(id: String, rating: f64) -> CommandResult {
    if !(0.0..=5.0).contains(&rating) {
        return CommandResult::failure(
            "counterparties.rate",
            "invalid_input",
            format!("rating must be between 0 and 5, got {rating}"),
            EXIT_CONFIG,
        );
    }

    with_database("counterparties.rate", |_config, pool| async move {
        let directory = SqlCounterpartyRepository::new(pool);
        directory.update_rating(&CounterpartyId(id.clone()), rating).await.map_err(repository_failure)?;
        Ok(CommandResult::success("counterparties.rate", format!("rated {id} at {rating}")))
    })
}

/// Hides the counterparty from matching. Replies to already dispatched units still land.
pub fn deactivate(id: String) -> CommandResult {
    with_database("counterparties.deactivate", |_config, pool| async move {
        let directory = SqlCounterpartyRepository::new(pool);
        directory.deactivate(&CounterpartyId(id.clone())).await.map_err(repository_failure)?;
        Ok(CommandResult::success("counterparties.deactivate", format!("deactivated {id}")))
    })
}

fn repository_failure(error: RepositoryError) -> Failure {
    match error {
        RepositoryError::NotFound(_) => execution_failure("not_found", error),
        RepositoryError::Conflict(_) => execution_failure("conflict", error),
        other => execution_failure("repository", other),
    }
}
