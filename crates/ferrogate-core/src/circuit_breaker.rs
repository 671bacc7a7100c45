//! Circuit breaker decision logic.
//!
//! Pure functions over a [`BreakerRecord`]: no locks, no I/O. The record itself lives
//! in a shared [`crate::store::BreakerStore`] and every transition computed here is
//! written back with a versioned compare-and-swap.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{UtcDateTime, ValidationError};

/// Circuit state shared by every caller of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit state '{other}'")),
        }
    }
}

/// Breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that trip a closed circuit.
    pub max_failures: u32,
    /// Cooldown before an open circuit admits a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerSettings {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Result<Self, ValidationError> {
        let settings = Self {
            max_failures,
            reset_timeout,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_failures == 0 {
            return Err(ValidationError::NotPositive {
                field: "max_failures",
            });
        }
        if self.reset_timeout.is_zero() {
            return Err(ValidationError::NotPositive {
                field: "reset_timeout",
            });
        }
        Ok(())
    }

    pub fn reset_timeout_ms(&self) -> i64 {
        i64::try_from(self.reset_timeout.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Durable per-provider breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerRecord {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Set only while open.
    pub opened_at: Option<UtcDateTime>,
    /// Set only while half-open; identifies the trial claim.
    pub trial_claimed_at: Option<UtcDateTime>,
    pub version: u64,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self::closed()
    }
}

impl BreakerRecord {
    /// The record a provider starts with.
    pub const fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_claimed_at: None,
            version: 0,
        }
    }

    /// Check that timestamps agree with the state.
    pub fn validate(&self) -> Result<(), String> {
        match (self.state, self.opened_at, self.trial_claimed_at) {
            (CircuitState::Closed, None, None)
            | (CircuitState::Open, Some(_), None)
            | (CircuitState::HalfOpen, None, Some(_)) => Ok(()),
            (state, opened_at, trial_claimed_at) => Err(format!(
                "state {state} with opened_at={} and trial_claimed_at={}",
                describe(opened_at),
                describe(trial_claimed_at)
            )),
        }
    }

    fn with_state(
        &self,
        state: CircuitState,
        consecutive_failures: u32,
        opened_at: Option<UtcDateTime>,
        trial_claimed_at: Option<UtcDateTime>,
    ) -> Self {
        Self {
            state,
            consecutive_failures,
            opened_at,
            trial_claimed_at,
            version: self.version,
        }
    }
}

fn describe(value: Option<UtcDateTime>) -> String {
    value.map_or_else(|| String::from("null"), UtcDateTime::format_rfc3339)
}

/// Why a call was rejected before reaching the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortCircuitReason {
    /// Open and still cooling down.
    Open,
    /// Half-open and another caller holds the trial.
    TrialInFlight,
    /// Breaker state could not be read or claimed.
    StoreUnavailable,
}

impl ShortCircuitReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::TrialInFlight => "trial_in_flight",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl Display for ShortCircuitReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Open => "provider is cooling down",
            Self::TrialInFlight => "trial call already in flight",
            Self::StoreUnavailable => "breaker state unavailable",
        })
    }
}

/// Admission decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Closed: call without writing.
    Proceed,
    /// The caller may make the trial call after swapping in this half-open record.
    ClaimTrial(BreakerRecord),
    Reject {
        reason: ShortCircuitReason,
        retry_after: Option<Duration>,
    },
}

/// Observed result of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Stateless breaker. Holds settings and the trial lease only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    trial_lease: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerSettings::default())
    }
}

impl CircuitBreaker {
    /// Breaker whose trial lease equals the reset timeout.
    pub const fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            trial_lease: settings.reset_timeout,
        }
    }

    /// Age after which an unanswered trial claim may be taken over.
    ///
    /// Must outlive the longest trial call, otherwise a second trial can start
    /// while the first is still in flight. Never shorter than the reset timeout.
    pub fn with_trial_lease(mut self, lease: Duration) -> Self {
        self.trial_lease = lease.max(self.settings.reset_timeout);
        self
    }

    pub const fn settings(&self) -> BreakerSettings {
        self.settings
    }

    pub const fn trial_lease(&self) -> Duration {
        self.trial_lease
    }

    /// Decide whether a call may go out at `now`.
    ///
    /// Open-to-half-open is evaluated here, lazily. The half-open record returned by
    /// [`Admission::ClaimTrial`] must be stored by compare-and-swap before calling out;
    /// losing that race means someone else holds the trial.
    pub fn admit(&self, record: &BreakerRecord, now: UtcDateTime) -> Admission {
        let reset_ms = self.settings.reset_timeout_ms();
        match record.state {
            CircuitState::Closed => Admission::Proceed,
            CircuitState::Open => {
                let elapsed = record
                    .opened_at
                    .map_or(reset_ms, |opened_at| now.millis_since(opened_at));
                if elapsed >= reset_ms {
                    Admission::ClaimTrial(self.claim(record, now))
                } else {
                    Admission::Reject {
                        reason: ShortCircuitReason::Open,
                        retry_after: Some(remaining(reset_ms, elapsed)),
                    }
                }
            }
            CircuitState::HalfOpen => {
                let lease_ms = i64::try_from(self.trial_lease.as_millis()).unwrap_or(i64::MAX);
                let elapsed = record
                    .trial_claimed_at
                    .map_or(lease_ms, |claimed_at| now.millis_since(claimed_at));
                if elapsed >= lease_ms {
                    // The claimant never reported back.
                    Admission::ClaimTrial(self.claim(record, now))
                } else {
                    Admission::Reject {
                        reason: ShortCircuitReason::TrialInFlight,
                        retry_after: None,
                    }
                }
            }
        }
    }

    /// Next record after `outcome` is observed.
    ///
    /// `trial` is the claim stamp when this call was the half-open trial. Only the
    /// current trial may close or reopen a half-open circuit. Late failures from calls
    /// admitted before the trip still count against an open circuit; any other late
    /// outcome leaves the record as it is.
    pub fn apply_outcome(
        &self,
        record: &BreakerRecord,
        outcome: CallOutcome,
        trial: Option<UtcDateTime>,
        now: UtcDateTime,
    ) -> BreakerRecord {
        let is_current_trial = record.state == CircuitState::HalfOpen
            && trial.is_some()
            && trial.map(UtcDateTime::unix_millis)
                == record.trial_claimed_at.map(UtcDateTime::unix_millis);

        if is_current_trial {
            return match outcome {
                CallOutcome::Success => record.with_state(CircuitState::Closed, 0, None, None),
                CallOutcome::Failure => record.with_state(
                    CircuitState::Open,
                    record.consecutive_failures.saturating_add(1),
                    Some(now),
                    None,
                ),
            };
        }

        match (record.state, outcome) {
            (CircuitState::Closed, CallOutcome::Success) => {
                record.with_state(CircuitState::Closed, 0, None, None)
            }
            (CircuitState::Closed, CallOutcome::Failure) => {
                let failures = record.consecutive_failures.saturating_add(1);
                if failures >= self.settings.max_failures {
                    record.with_state(CircuitState::Open, failures, Some(now), None)
                } else {
                    record.with_state(CircuitState::Closed, failures, None, None)
                }
            }
            (CircuitState::Open, CallOutcome::Failure) => record.with_state(
                CircuitState::Open,
                record.consecutive_failures.saturating_add(1),
                record.opened_at,
                None,
            ),
            _ => record.clone(),
        }
    }

    fn claim(&self, record: &BreakerRecord, now: UtcDateTime) -> BreakerRecord {
        record.with_state(
            CircuitState::HalfOpen,
            record.consecutive_failures,
            None,
            Some(now),
        )
    }
}

fn remaining(reset_ms: i64, elapsed_ms: i64) -> Duration {
    let remaining = reset_ms.saturating_sub(elapsed_ms.max(0));
    Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
}
