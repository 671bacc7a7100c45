//! Request telemetry.
//!
//! Every guarded call yields exactly one [`TelemetryEntry`], short-circuits
//! included. Entries go through a [`TelemetryRecorder`], which hands them to a
//! background task so the caller never waits on, or fails because of, the sink.

mod recorder;
mod sinks;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use ferrogate_warehouse::ApiRequestRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CircuitState, CorrelationId, HttpMethod, ProviderId, UtcDateTime};

pub use recorder::{TelemetryRecorder, DEFAULT_TELEMETRY_CAPACITY};
pub use sinks::{MemoryTelemetrySink, WarehouseTelemetrySink};

/// Longest request or response body prefix kept in an entry, in characters.
pub const RESPONSE_EXCERPT_LIMIT: usize = 2_000;

/// Headers whose values never reach telemetry.
const REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
    "x-api-key",
];

const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryOutcome {
    Success,
    Failure,
    ShortCircuited,
}

impl TelemetryOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::ShortCircuited => "short_circuited",
        }
    }
}

impl Display for TelemetryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEntry {
    pub correlation_id: CorrelationId,
    pub provider_id: ProviderId,
    pub http_method: HttpMethod,
    pub endpoint: String,
    pub started_at: UtcDateTime,
    pub duration: Duration,
    pub outcome: TelemetryOutcome,
    pub status_code: Option<u16>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    /// State observed at admission; `None` when the store could not be read.
    pub breaker_state: Option<CircuitState>,
    /// Outgoing headers with credentials redacted.
    pub request_headers: BTreeMap<String, String>,
    pub request_payload: Option<String>,
    /// Empty unless a response arrived.
    pub response_headers: BTreeMap<String, String>,
    pub response_excerpt: Option<String>,
}

impl TelemetryEntry {
    pub fn to_record(&self) -> ApiRequestRecord {
        ApiRequestRecord {
            correlation_id: self.correlation_id.to_string(),
            provider_id: self.provider_id.to_string(),
            http_method: self.http_method.as_str().to_owned(),
            endpoint: self.endpoint.clone(),
            started_at_ms: self.started_at.unix_millis(),
            duration_ms: i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX),
            outcome: self.outcome.as_str().to_owned(),
            status_code: self.status_code.map(i32::from),
            error_kind: self.error_kind.clone(),
            error_message: self.error_message.clone(),
            breaker_state: self
                .breaker_state
                .map_or("unknown", CircuitState::as_str)
                .to_owned(),
            request_headers: headers_json(&self.request_headers),
            request_payload: self.request_payload.clone(),
            response_headers: headers_json(&self.response_headers),
            response_excerpt: self.response_excerpt.clone(),
        }
    }
}

/// JSON object text for storage; `None` when there are no headers.
fn headers_json(headers: &BTreeMap<String, String>) -> Option<String> {
    if headers.is_empty() {
        return None;
    }
    serde_json::to_string(headers).ok()
}

/// Copy of `headers` safe to persist.
pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                REDACTED.to_owned()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

/// First [`RESPONSE_EXCERPT_LIMIT`] characters of `body`; `None` when empty.
pub fn excerpt(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(body.chars().take(RESPONSE_EXCERPT_LIMIT).collect())
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry sink failed: {message}")]
    Sink { message: String },
}

impl TelemetryError {
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }
}

/// Durable destination for telemetry entries.
pub trait TelemetrySink: Send + Sync {
    fn append<'a>(
        &'a self,
        entry: &'a TelemetryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>>;
}
