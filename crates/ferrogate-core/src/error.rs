use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::ShortCircuitReason;
use crate::http_client::HttpError;
use crate::source::ProviderId;

/// Validation and contract errors exposed by `ferrogate-core`.
///
/// These are returned when values are constructed, never from a guarded call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("provider id cannot be empty")]
    EmptyProviderId,
    #[error("provider id length {len} exceeds max {max}")]
    ProviderIdTooLong { len: usize, max: usize },
    #[error("provider id must start with an ASCII letter or digit: '{ch}'")]
    ProviderIdInvalidStart { ch: char },
    #[error("provider id contains invalid character '{ch}' at index {index}")]
    ProviderIdInvalidChar { ch: char, index: usize },

    #[error("correlation id cannot be empty")]
    EmptyCorrelationId,
    #[error("correlation id length {len} exceeds max {max}")]
    CorrelationIdTooLong { len: usize, max: usize },
    #[error("correlation id must be printable ASCII (invalid byte at index {index})")]
    CorrelationIdInvalidChar { index: usize },

    #[error(
        "invalid http method '{value}', expected one of \
         GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS"
    )]
    InvalidMethod { value: String },
    #[error("invalid url '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("url scheme must be http or https: '{scheme}'")]
    UnsupportedScheme { scheme: String },
    #[error("invalid header '{value}', expected name:value")]
    InvalidHeader { value: String },

    #[error("invalid status range '{value}', expected CODE or LOW-HIGH within 100-599")]
    InvalidStatusRange { value: String },

    #[error("field '{field}' must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix milliseconds out of range: {value}")]
    TimestampOutOfRange { value: i64 },

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("schema_version must match vMAJOR.MINOR.PATCH: '{value}'")]
    InvalidSchemaVersion { value: String },
    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// A call that was rejected without reaching the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub provider: ProviderId,
    pub reason: ShortCircuitReason,
    /// Remaining cooldown when it is known.
    pub retry_after: Option<Duration>,
}

impl Display for CircuitOpenError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit open for '{}': {}", self.provider, self.reason)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, " (retry after {}ms)", retry_after.as_millis())?;
        }
        Ok(())
    }
}

impl std::error::Error for CircuitOpenError {}

/// Why an attempted call counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Transport(HttpError),
    Status { status: u16, body: String },
}

/// A call that reached the provider and failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailedError {
    pub provider: ProviderId,
    pub cause: FailureCause,
}

impl Display for RequestFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            FailureCause::Transport(error) => {
                write!(f, "request to '{}' failed: {error}", self.provider)
            }
            FailureCause::Status { status, .. } => {
                write!(f, "request to '{}' failed with status {status}", self.provider)
            }
        }
    }
}

impl std::error::Error for RequestFailedError {}

/// Result error of [`crate::RequestMaker::request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error(transparent)]
    RequestFailed(#[from] RequestFailedError),

    /// The stored breaker record is malformed. Never turned into a short-circuit.
    #[error("corrupt breaker record for '{provider}': {reason}")]
    Corrupt { provider: ProviderId, reason: String },
}

impl RequestError {
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    pub const fn is_request_failed(&self) -> bool {
        matches!(self, Self::RequestFailed(_))
    }
}
