//! Bounded retries for breaker compare-and-swap conflicts.

use std::time::Duration;

use crate::ValidationError;

/// Delay between compare-and-swap attempts after a conflict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// No delay; re-read immediately.
    None,
    Fixed { delay: Duration },
    /// `base * factor^attempt`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(5),
            factor: 2.0,
            max: Duration::from_millis(50),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let capped = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(capped.max(0.0));
                if jitter {
                    spread(delay)
                } else {
                    delay
                }
            }
        }
    }
}

fn spread(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let half = millis / 2;
    let offset = fastrand::u64(0..=half.saturating_mul(2));
    Duration::from_millis((millis - half).saturating_add(offset))
}

/// How many times a conflicting breaker write is re-read and retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CasRetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for CasRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl CasRetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, ValidationError> {
        if max_attempts == 0 {
            return Err(ValidationError::NotPositive {
                field: "max_cas_attempts",
            });
        }
        Ok(Self {
            max_attempts,
            ..Self::default()
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wait before the attempt following `attempt` (0-based).
    pub async fn pause(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
