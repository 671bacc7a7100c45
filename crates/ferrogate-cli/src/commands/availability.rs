use serde_json::Value;

use crate::cli::AvailabilityArgs;
use crate::error::CliError;

use super::{since_minutes_ago, CommandResult, Context};

pub async fn run(args: &AvailabilityArgs, context: &Context) -> Result<CommandResult, CliError> {
    let summaries = context
        .backend
        .provider_availability(since_minutes_ago(args.since_minutes))
        .await?;
    let latencies = context.backend.provider_latency().await?;

    let mut rows = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        let mut row = serde_json::to_value(summary)?;
        let latency = latencies
            .iter()
            .find(|latency| latency.provider_id == summary.provider_id);
        if let (Value::Object(fields), Some(latency)) = (&mut row, latency) {
            fields.insert("avg_duration_ms".to_owned(), latency.avg_duration_ms.into());
            fields.insert("p95_duration_ms".to_owned(), latency.p95_duration_ms.into());
        }
        rows.push(row);
    }

    let mut result = CommandResult::ok(Value::Array(rows));
    if summaries.is_empty() {
        result = result.with_warning("no calls recorded in the selected window");
    }
    Ok(result)
}
