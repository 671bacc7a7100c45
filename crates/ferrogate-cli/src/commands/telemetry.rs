use ferrogate_core::{ApiRequestFilter, TelemetryOutcome};

use crate::cli::{OutcomeArg, TelemetryArgs};
use crate::error::CliError;

use super::{parse_provider, since_minutes_ago, CommandResult, Context};

pub async fn run(args: &TelemetryArgs, context: &Context) -> Result<CommandResult, CliError> {
    let provider = parse_provider(&args.provider)?;
    if args.limit == 0 {
        return Err(CliError::Command(String::from(
            "--limit must be greater than zero",
        )));
    }

    let filter = ApiRequestFilter {
        provider_id: Some(provider.to_string()),
        outcome: args.outcome.map(|outcome| to_outcome(outcome).as_str().to_owned()),
        since_ms: since_minutes_ago(args.since_minutes),
        limit: args.limit,
        ..ApiRequestFilter::default()
    };
    let records = context.backend.query_api_requests(&filter).await?;

    let mut result = CommandResult::ok(serde_json::to_value(&records)?).with_provider(provider);
    if records.len() == args.limit {
        result = result.with_warning(format!(
            "showing the newest {} entries (use --limit to see more)",
            args.limit
        ));
    }
    Ok(result)
}

const fn to_outcome(outcome: OutcomeArg) -> TelemetryOutcome {
    match outcome {
        OutcomeArg::Success => TelemetryOutcome::Success,
        OutcomeArg::Failure => TelemetryOutcome::Failure,
        OutcomeArg::ShortCircuited => TelemetryOutcome::ShortCircuited,
    }
}
