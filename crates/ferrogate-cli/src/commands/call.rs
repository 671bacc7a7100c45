use std::sync::Arc;
use std::time::Duration;

use ferrogate_core::{
    CorrelationId, EnvelopeError, FailureCause, GatewayClients, HttpMethod, HttpRequest,
    ReqwestHttpClient, RequestError, SystemClock, TelemetryRecorder,
};
use serde_json::{json, Value};

use crate::cli::{CallArgs, MethodArg};
use crate::error::CliError;

use super::{parse_provider, CommandResult, Context};

pub async fn run(
    args: &CallArgs,
    timeout_ms: Option<u64>,
    context: &Context,
) -> Result<CommandResult, CliError> {
    let provider = parse_provider(&args.provider)?;
    let request = build_request(args, timeout_ms)?;
    let correlation_id = args
        .correlation_id
        .as_deref()
        .map(CorrelationId::parse)
        .transpose()?
        .unwrap_or_default();

    let telemetry = Arc::new(TelemetryRecorder::spawn(context.backend.sink()));
    let clients = GatewayClients::new(
        context.config.clone(),
        context.backend.store(),
        telemetry.clone(),
        Arc::new(ReqwestHttpClient::new()),
        Arc::new(SystemClock),
    );

    let maker = clients.maker_for(&provider);
    let outcome = maker.request(request, Some(correlation_id.clone())).await;
    telemetry.close().await;

    let result = CommandResult::ok(Value::Null).with_provider(provider.clone());
    match outcome {
        Ok(response) => Ok(CommandResult {
            data: json!({
                "correlation_id": correlation_id.as_str(),
                "status": response.status,
                "headers": response.headers,
                "body": response.body,
            }),
            ..result
        }),
        Err(RequestError::CircuitOpen(open)) => {
            let mut result = result.with_error(
                EnvelopeError::new("circuit_open", open.to_string())?
                    .with_retryable(true)
                    .with_provider(provider),
            );
            result.data = json!({
                "correlation_id": correlation_id.as_str(),
                "reason": open.reason.as_str(),
                "retry_after_ms": open.retry_after.map(|after| after.as_millis() as u64),
            });
            Ok(result)
        }
        Err(RequestError::RequestFailed(failed)) => {
            let (status, body) = match &failed.cause {
                FailureCause::Status { status, body } => (Some(*status), Some(body.clone())),
                FailureCause::Transport(_) => (None, None),
            };
            let mut result = result.with_error(
                EnvelopeError::new("request_failed", failed.to_string())?
                    .with_retryable(true)
                    .with_provider(provider),
            );
            result.data = json!({
                "correlation_id": correlation_id.as_str(),
                "status": status,
                "body": body,
            });
            Ok(result)
        }
        Err(error @ RequestError::Corrupt { .. }) => Err(CliError::Command(error.to_string())),
    }
}

fn build_request(args: &CallArgs, timeout_ms: Option<u64>) -> Result<HttpRequest, CliError> {
    let mut request = HttpRequest::parse(to_method(args.method), &args.url)?;
    for line in &args.headers {
        request = request.with_header_line(line)?;
    }
    if let Some(body) = &args.body {
        request = request.with_body(body.clone());
    }
    if let Some(timeout_ms) = timeout_ms {
        if timeout_ms == 0 {
            return Err(CliError::Command(String::from(
                "--timeout-ms must be greater than zero",
            )));
        }
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }
    Ok(request)
}

const fn to_method(method: MethodArg) -> HttpMethod {
    match method {
        MethodArg::Get => HttpMethod::Get,
        MethodArg::Post => HttpMethod::Post,
        MethodArg::Put => HttpMethod::Put,
        MethodArg::Patch => HttpMethod::Patch,
        MethodArg::Delete => HttpMethod::Delete,
        MethodArg::Head => HttpMethod::Head,
        MethodArg::Options => HttpMethod::Options,
    }
}
