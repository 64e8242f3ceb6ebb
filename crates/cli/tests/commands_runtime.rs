use std::env;
use std::sync::{Mutex, OnceLock};

use procura_cli::commands::counterparties::{self, NewCounterparty};
use procura_cli::commands::{config, history, migrate, quote, repeat, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_database_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn invalid_database_url_is_a_config_failure() {
    with_env(&[("PROCURA_DATABASE_URL", "postgres://localhost/procura")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_database_env(&[], || {
        let first = parse_payload(&seed::run().output);
        assert_eq!(first["status"], "ok");
        assert_eq!(first["data"]["inserted"], 10);

        let second = parse_payload(&seed::run().output);
        assert_eq!(second["status"], "ok");
        assert_eq!(second["data"]["inserted"], 0);
        assert_eq!(second["data"]["skipped"], 10);
    });
}

#[test]
fn counterparties_round_trip_through_the_directory() {
    with_database_env(&[], || {
        let added = counterparties::add(depot("+55 67 3316-0100"));
        assert_eq!(added.exit_code, 0, "{}", added.output);
        let added = parse_payload(&added.output);
        let id = added["data"]["id"].as_str().expect("id").to_string();
        assert_eq!(added["data"]["address"], "+556733160100");

        let duplicate = counterparties::add(depot("+556733160100"));
        assert_eq!(duplicate.exit_code, 5);
        assert_eq!(parse_payload(&duplicate.output)["error_class"], "conflict");

        let listed = parse_payload(&counterparties::list(vec!["cement".to_string()]).output);
        assert_eq!(listed["data"]["count"], 1);

        assert_eq!(counterparties::rate(id.clone(), 4.5).exit_code, 0);
        assert_eq!(counterparties::rate(id.clone(), 9.0).exit_code, 2);
        assert_eq!(counterparties::deactivate(id).exit_code, 0);

        let listed = parse_payload(&counterparties::list(Vec::new()).output);
        assert_eq!(listed["data"]["count"], 0);
    });
}

#[test]
fn unknown_counterparty_is_not_found() {
    with_database_env(&[], || {
        let result = counterparties::rate("cp-missing".to_string(), 3.0);
        assert_eq!(result.exit_code, 5);
        assert_eq!(parse_payload(&result.output)["error_class"], "not_found");
    });
}

#[test]
fn quote_is_a_dry_run_that_reports_the_would_be_wait() {
    with_database_env(&[("PROCURA_ENGINE_URGENT_TIMEOUT_SECS", "120")], || {
        assert_eq!(counterparties::add(depot("+556733160200")).exit_code, 0);

        let result = quote::run("10 bags of cement".to_string(), true);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["outcome"]["kind"], "dispatched");
        assert_eq!(payload["data"]["outcome"]["would_wait"]["secs"], 120);
        assert_eq!(payload["data"]["outcome"]["units"].as_array().map(Vec::len), Some(1));
        let messages = payload["data"]["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["address"], "+556733160200");
        assert!(messages[0]["text"].as_str().unwrap_or_default().contains("cement"));
        let warnings = payload["data"]["warnings"].as_array().expect("warnings");
        assert!(warnings[0].as_str().unwrap_or_default().contains("most_recent_pending"));
        assert!(payload["message"].as_str().unwrap_or_default().contains("warning:"));
    });
}

#[test]
fn quote_without_matches_reports_no_counterparties() {
    with_database_env(&[], || {
        let payload = parse_payload(&quote::run("2 tons of unobtainium".to_string(), false).output);
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["outcome"]["kind"], "no_counterparties");
        assert_eq!(payload["data"]["messages"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn history_and_repeat_start_empty() {
    with_database_env(&[], || {
        let history = parse_payload(&history::run(5).output);
        assert_eq!(history["status"], "ok");
        assert_eq!(history["data"]["purchases"].as_array().map(Vec::len), Some(0));

        let repeat = parse_payload(&repeat::run(false).output);
        assert_eq!(repeat["status"], "ok");
        assert_eq!(repeat["message"], "no previous purchase to repeat");
    });
}

#[test]
fn config_reports_env_sources() {
    with_database_env(&[("PROCURA_ENGINE_LOCALITY", "campo grande")], || {
        let payload = parse_payload(&config::run().output);
        let message = payload["message"].as_str().expect("message");
        assert!(message.contains(
            "- engine.locality = campo grande (source: env (PROCURA_ENGINE_LOCALITY))"
        ));
    });
}

fn depot(address: &str) -> NewCounterparty {
    NewCounterparty {
        name: "Depot Central".to_string(),
        address: address.to_string(),
        locality: "local".to_string(),
        categories: vec!["cement".to_string()],
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

/// Runs `test_fn` against a fresh on-disk database shared by every command it invokes.
fn with_database_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("procura.db").display());
    let mut all = vec![("PROCURA_DATABASE_URL", url.as_str())];
    all.extend_from_slice(vars);
    with_env(&all, test_fn);
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "PROCURA_DATABASE_URL",
        "PROCURA_DATABASE_MAX_CONNECTIONS",
        "PROCURA_DATABASE_TIMEOUT_SECS",
        "PROCURA_CHANNEL_MODE",
        "PROCURA_CHANNEL_GATEWAY_URL",
        "PROCURA_CHANNEL_GATEWAY_TOKEN",
        "PROCURA_ASSISTANT_BACKEND",
        "PROCURA_ASSISTANT_API_KEY",
        "ANTHROPIC_API_KEY",
        "PROCURA_ENGINE_LOCALITY",
        "PROCURA_ENGINE_QUOTE_TIMEOUT_SECS",
        "PROCURA_ENGINE_URGENT_TIMEOUT_SECS",
        "PROCURA_ENGINE_CORRELATION_POLICY",
        "PROCURA_LOGGING_LEVEL",
        "PROCURA_LOGGING_FORMAT",
        "PROCURA_LOG_LEVEL",
        "PROCURA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
