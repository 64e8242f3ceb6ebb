use serde::Serialize;

use crate::commands::{with_database, CommandResult, EXIT_EXECUTION};
use procura_db::SeedDirectory;

#[derive(Debug, Serialize)]
struct SeedSummary {
    inserted: usize,
    skipped: usize,
}

pub fn run() -> CommandResult {
    with_database("seed", |_config, pool| async move {
        let loaded = SeedDirectory::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_EXECUTION))?;
        let verification = SeedDirectory::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_EXECUTION))?;

        if !verification.all_present {
            let missing = verification
                .checks
                .iter()
                .filter_map(|(check, present)| (!present).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&missing), EXIT_EXECUTION));
        }

        Ok(CommandResult::success_with(
            "seed",
            format!(
                "sample directory ready: {} counterparties inserted, {} already present",
                loaded.inserted, loaded.skipped
            ),
            SeedSummary { inserted: loaded.inserted, skipped: loaded.skipped },
        ))
    })
}

fn verification_message(missing: &[&str]) -> String {
    if missing.is_empty() {
        "some seed counterparties failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", missing.join(", "))
    }
}
