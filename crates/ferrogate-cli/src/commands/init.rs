use serde_json::json;

use crate::error::CliError;

use super::{CommandResult, Context};

/// Opening the backend already migrates it; report what is there.
pub async fn run(context: &Context) -> Result<CommandResult, CliError> {
    let migrations = context.backend.initialize().await?;

    let data = json!({
        "database": context.backend.describe(),
        "migrations": migrations,
        "configured_providers": context
            .config
            .provider_ids()
            .map(|provider| provider.as_str())
            .collect::<Vec<_>>(),
    });

    Ok(CommandResult::ok(data))
}
