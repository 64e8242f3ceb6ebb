use std::sync::Arc;

use serde::Serialize;

use crate::commands::{execution_failure, with_database, CommandResult, Failure, EXIT_CONFIG};
use procura_agent::{
    AssistantBackend, EngineError, EngineStores, QuoteCommand, QuoteWorkflow, WorkflowOutcome,
    WorkflowSettings,
};
use procura_channel::{SentMessage, SimulatedChannel};
use procura_core::config::AppConfig;
use procura_core::correlation::CorrelationPolicy;
use procura_db::DbPool;

/// What a dry run would have done: the workflow outcome plus every message it would send.
#[derive(Debug, Serialize)]
pub(crate) struct DryRun {
    pub outcome: WorkflowOutcome,
    pub messages: Vec<SentMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DryRun {
    pub fn new(outcome: WorkflowOutcome, messages: Vec<SentMessage>, policy: CorrelationPolicy) -> Self {
        let warnings = dry_run_warnings(&outcome, policy);
        Self { outcome, messages, warnings }
    }
}

/// Dispatches through the simulated channel and skips the wait. Quote units are still
/// persisted, so a dry run leaves pending units behind like a live one does.
pub fn run(description: String, urgent: bool) -> CommandResult {
    if description.trim().is_empty() {
        return CommandResult::failure(
            "quote",
            "invalid_input",
            "describe what you want to buy",
            EXIT_CONFIG,
        );
    }

    with_database("quote", |config, pool| async move {
        let (workflow, channel) = dry_run_workflow(&config, pool)?;
        let outcome = workflow
            .run(QuoteCommand { description, urgent, wait: false })
            .await
            .map_err(engine_failure)?;
        let messages = channel.sent().await;
        let dry_run = DryRun::new(outcome, messages, config.engine.correlation_policy);

        Ok(CommandResult::success_with("quote", summarize(&dry_run), dry_run))
    })
}

pub(crate) fn dry_run_workflow(
    config: &AppConfig,
    pool: DbPool,
) -> Result<(QuoteWorkflow, SimulatedChannel), Failure> {
    let assistant = AssistantBackend::from_config(&config.assistant)
        .map_err(|error| ("config_validation", error.to_string(), EXIT_CONFIG))?;
    let channel = SimulatedChannel::new();
    let workflow = QuoteWorkflow::new(
        WorkflowSettings::from(&config.engine),
        EngineStores::sql(pool),
        Arc::new(assistant),
        Arc::new(channel.clone()),
    );
    Ok((workflow, channel))
}

pub(crate) fn summarize(dry_run: &DryRun) -> String {
    let messages = dry_run.messages.len();
    let summary = match &dry_run.outcome {
        WorkflowOutcome::NoCounterparties { request } => {
            format!("request {}: no counterparties found for the requested items", request.id)
        }
        WorkflowOutcome::Dispatched { request, would_wait, .. } => format!(
            "request {}: dry run composed {messages} solicitations; a live run would wait up to {}s",
            request.id,
            would_wait.as_secs()
        ),
        WorkflowOutcome::Decided { request, outcome, .. } => {
            format!("request {}: {}", request.id, outcome.recommendation)
        }
    };
    match dry_run.warnings.as_slice() {
        [] => summary,
        warnings => format!("{summary}. warning: {}", warnings.join("; ")),
    }
}

/// Dry-run units are real pending rows. Under `most_recent_pending` they are the newest
/// pending unit of each solicited counterparty until they expire, so a reply meant for a
/// live request from the same counterparty is credited to the dry run instead.
pub(crate) fn dry_run_warnings(outcome: &WorkflowOutcome, policy: CorrelationPolicy) -> Vec<String> {
    match (outcome, policy) {
        (WorkflowOutcome::Dispatched { units, .. }, CorrelationPolicy::MostRecentPending)
            if !units.is_empty() =>
        {
            vec![format!(
                "{} dry-run quote units stay pending; under most_recent_pending they will absorb                  replies meant for live requests to the same counterparties",
                units.len()
            )]
        }
        _ => Vec::new(),
    }
}

pub(crate) fn engine_failure(error: EngineError) -> Failure {
    let class = match &error {
        EngineError::Repository(_) => "repository",
        EngineError::Domain(_) => "invalid_input",
        EngineError::Assistant { .. } | EngineError::Compose { .. } => "assistant",
        EngineError::Send { .. } => "channel",
        EngineError::RequestNotFound(_) => "not_found",
    };
    execution_failure(class, error)
}
