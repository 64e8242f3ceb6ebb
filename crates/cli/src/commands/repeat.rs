use crate::commands::quote::{dry_run_workflow, engine_failure, summarize, DryRun};
use crate::commands::{with_database, CommandResult};

/// Quotes the last remembered purchase again, as a dry run.
pub fn run(urgent: bool) -> CommandResult {
    with_database("repeat", |config, pool| async move {
        let (workflow, channel) = dry_run_workflow(&config, pool)?;
        let Some(outcome) = workflow.repeat_last(urgent, false).await.map_err(engine_failure)?
        else {
            return Ok(CommandResult::success("repeat", "no previous purchase to repeat"));
        };
        let messages = channel.sent().await;
        let dry_run = DryRun::new(outcome, messages, config.engine.correlation_policy);

        Ok(CommandResult::success_with(
            "repeat",
            format!("repeating `{}`: {}", dry_run.outcome.request().description, summarize(&dry_run)),
            dry_run,
        ))
    })
}
