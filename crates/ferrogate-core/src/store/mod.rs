//! Durable, shared breaker state.
//!
//! One [`BreakerRecord`] exists per provider. Every writer goes through
//! [`BreakerStore::compare_and_swap`], which succeeds only if the stored version
//! still matches what the writer read. Nothing is locked pessimistically.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod warehouse;

use std::future::Future;
use std::pin::Pin;

use ferrogate_warehouse::{BreakerStateRow, BreakerStateUpdate};
use thiserror::Error;

use crate::retry::CasRetryPolicy;
use crate::{BreakerRecord, CircuitState, ProviderId, UtcDateTime};

pub use memory::MemoryBreakerStore;
#[cfg(feature = "postgres")]
pub use postgres::{DatabaseUrlError, PostgresBackend, PostgresConfig};
pub use warehouse::WarehouseBreakerStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or did not answer.
    #[error("breaker store unavailable: {message}")]
    Unavailable { message: String },

    /// A stored record violates the record invariants.
    #[error("corrupt breaker record for '{provider}': {reason}")]
    Corrupt { provider: String, reason: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The new record as stored, with its bumped version.
    Swapped(BreakerRecord),
    /// The stored version no longer matched.
    Conflict,
}

/// Shared breaker state contract.
pub trait BreakerStore: Send + Sync {
    /// Current record, created closed at version 0 when absent.
    fn read<'a>(
        &'a self,
        provider: &'a ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<BreakerRecord, StoreError>> + Send + 'a>>;

    /// Store `next` (its version field is ignored) if the current version equals
    /// `expected_version`. A stored swap has version `expected_version + 1`.
    fn compare_and_swap<'a>(
        &'a self,
        provider: &'a ProviderId,
        expected_version: u64,
        next: &'a BreakerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + 'a>>;
}

/// Force a provider's breaker back to closed with a zero failure count.
pub async fn reset_breaker(
    store: &dyn BreakerStore,
    provider: &ProviderId,
    policy: CasRetryPolicy,
) -> Result<BreakerRecord, StoreError> {
    for attempt in 0..policy.max_attempts {
        let current = store.read(provider).await?;
        if current.state == CircuitState::Closed && current.consecutive_failures == 0 {
            return Ok(current);
        }

        match store
            .compare_and_swap(provider, current.version, &BreakerRecord::closed())
            .await?
        {
            CasOutcome::Swapped(record) => {
                tracing::info!(
                    provider = %provider,
                    from = %current.state,
                    version = record.version,
                    "breaker reset"
                );
                return Ok(record);
            }
            CasOutcome::Conflict => policy.pause(attempt).await,
        }
    }

    Err(StoreError::unavailable(format!(
        "reset of '{provider}' lost {} consecutive races",
        policy.max_attempts
    )))
}

/// Decode a persisted row, checking every record invariant.
pub(crate) fn decode_row(row: &BreakerStateRow) -> Result<BreakerRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        provider: row.provider_id.clone(),
        reason,
    };

    let state = row.state.parse::<CircuitState>().map_err(corrupt)?;
    let consecutive_failures = u32::try_from(row.consecutive_failures)
        .map_err(|_| corrupt(format!("failure count {} out of range", row.consecutive_failures)))?;
    let version = u64::try_from(row.version)
        .map_err(|_| corrupt(format!("negative version {}", row.version)))?;
    let opened_at = decode_millis(row.opened_at_ms).map_err(corrupt)?;
    let trial_claimed_at = decode_millis(row.trial_claimed_at_ms).map_err(corrupt)?;

    let record = BreakerRecord {
        state,
        consecutive_failures,
        opened_at,
        trial_claimed_at,
        version,
    };
    record.validate().map_err(corrupt)?;
    Ok(record)
}

pub(crate) fn encode_update(record: &BreakerRecord) -> BreakerStateUpdate {
    BreakerStateUpdate {
        state: record.state.as_str().to_owned(),
        consecutive_failures: i64::from(record.consecutive_failures),
        opened_at_ms: record.opened_at.map(UtcDateTime::unix_millis),
        trial_claimed_at_ms: record.trial_claimed_at.map(UtcDateTime::unix_millis),
    }
}

pub(crate) fn encode_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::unavailable(format!("version {version} out of range")))
}

fn decode_millis(value: Option<i64>) -> Result<Option<UtcDateTime>, String> {
    value
        .map(|millis| UtcDateTime::from_unix_millis(millis).map_err(|error| error.to_string()))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        state: &str,
        opened_at_ms: Option<i64>,
        trial_claimed_at_ms: Option<i64>,
    ) -> BreakerStateRow {
        BreakerStateRow {
            provider_id: String::from("nse"),
            state: state.to_owned(),
            consecutive_failures: 3,
            opened_at_ms,
            trial_claimed_at_ms,
            version: 7,
        }
    }

    #[test]
    fn decodes_well_formed_rows() {
        let record = decode_row(&row("open", Some(1_000), None)).expect("valid");
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.opened_at.map(UtcDateTime::unix_millis), Some(1_000));
        assert_eq!(record.version, 7);

        let encoded = encode_update(&record);
        assert_eq!(encoded.state, "open");
        assert_eq!(encoded.opened_at_ms, Some(1_000));
    }

    #[test]
    fn malformed_rows_are_corrupt() {
        for bad in [
            row("tripped", None, None),
            row("open", None, None),
            row("half_open", Some(1), Some(2)),
            row("closed", Some(1), None),
        ] {
            assert!(matches!(decode_row(&bad), Err(StoreError::Corrupt { .. })), "{bad:?}");
        }

        let negative = BreakerStateRow {
            version: -1,
            ..row("closed", None, None)
        };
        assert!(matches!(decode_row(&negative), Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn reset_closes_an_open_breaker() {
        let store = MemoryBreakerStore::new();
        let provider = ProviderId::parse("nse").expect("valid");
        store.seed(
            &provider,
            BreakerRecord {
                state: CircuitState::Open,
                consecutive_failures: 5,
                opened_at: Some(UtcDateTime::now()),
                trial_claimed_at: None,
                version: 3,
            },
        );

        let record = reset_breaker(&store, &provider, CasRetryPolicy::default())
            .await
            .expect("reset");

        assert_eq!(record.state, CircuitState::Closed);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.version, 4);
    }
}
