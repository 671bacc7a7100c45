use ferrogate_core::{reset_breaker, BreakerStore};
use serde_json::json;

use crate::cli::{BreakerArgs, BreakerCommand};
use crate::error::CliError;

use super::{parse_provider, CommandResult, Context};

pub async fn run(command: &BreakerCommand, context: &Context) -> Result<CommandResult, CliError> {
    match command {
        BreakerCommand::List => list(context).await,
        BreakerCommand::Show(args) => show(args, context).await,
        BreakerCommand::Reset(args) => reset(args, context).await,
    }
}

async fn list(context: &Context) -> Result<CommandResult, CliError> {
    let rows = context.backend.list_breaker_states().await?;
    let result = if rows.is_empty() {
        CommandResult::ok(json!([])).with_warning("no breaker state recorded yet")
    } else {
        CommandResult::ok(serde_json::to_value(&rows)?)
    };
    Ok(result)
}

async fn show(args: &BreakerArgs, context: &Context) -> Result<CommandResult, CliError> {
    let provider = parse_provider(&args.provider)?;
    let record = context.backend.store().read(&provider).await?;

    let settings = context.config.settings_for(&provider);
    let data = json!({
        "provider": provider.as_str(),
        "record": record,
        "max_failures": settings.breaker.max_failures,
        "reset_timeout_ms": settings.breaker.reset_timeout_ms(),
        "trial_lease_ms": settings.trial_lease().as_millis() as u64,
    });
    Ok(CommandResult::ok(data).with_provider(provider))
}

async fn reset(args: &BreakerArgs, context: &Context) -> Result<CommandResult, CliError> {
    let provider = parse_provider(&args.provider)?;
    let store = context.backend.store();
    let policy = context.config.settings_for(&provider).cas_retry;

    let record = reset_breaker(store.as_ref(), &provider, policy).await?;
    let data = json!({
        "provider": provider.as_str(),
        "record": record,
    });
    Ok(CommandResult::ok(data).with_provider(provider))
}
