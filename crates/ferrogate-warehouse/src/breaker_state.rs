//! Versioned breaker rows.
//!
//! Every mutation of a provider's row is a compare-and-swap on `version`. A row
//! is created lazily in the closed state with version 0 the first time it is read.

use ::duckdb::{params, Connection, Row};
use serde::Serialize;

use crate::{finalize_transaction, is_write_conflict, Warehouse, WarehouseError};

const SELECT_COLUMNS: &str = "SELECT provider_id, state, consecutive_failures, opened_at_ms, \
     trial_claimed_at_ms, version FROM breaker_state";

/// Persisted breaker row as stored. State names are lowercase
/// (`closed`, `open`, `half_open`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStateRow {
    pub provider_id: String,
    pub state: String,
    pub consecutive_failures: i64,
    pub opened_at_ms: Option<i64>,
    pub trial_claimed_at_ms: Option<i64>,
    pub version: i64,
}

/// Replacement values for a compare-and-swap. The version is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStateUpdate {
    pub state: String,
    pub consecutive_failures: i64,
    pub opened_at_ms: Option<i64>,
    pub trial_claimed_at_ms: Option<i64>,
}

impl Warehouse {
    /// Read the breaker row for `provider_id`, creating a closed row at version 0
    /// if none exists.
    pub fn read_breaker_state(&self, provider_id: &str) -> Result<BreakerStateRow, WarehouseError> {
        let connection = self.connection()?;
        if let Some(row) = select_breaker_state(&connection, provider_id)? {
            return Ok(row);
        }

        let inserted = connection.execute(
            "INSERT OR IGNORE INTO breaker_state \
             (provider_id, state, consecutive_failures, version, updated_at) \
             VALUES (?, 'closed', 0, 0, CURRENT_TIMESTAMP)",
            params![provider_id],
        );
        if let Err(error) = inserted {
            // Another worker created the row first.
            if !is_write_conflict(&error) {
                return Err(error.into());
            }
        }

        select_breaker_state(&connection, provider_id)?.ok_or_else(|| WarehouseError::MissingRow {
            key: provider_id.to_string(),
        })
    }

    /// Replace the row for `provider_id` if its version still equals
    /// `expected_version`.
    ///
    /// Returns the stored row (with version `expected_version + 1`) on success and
    /// `None` when the version moved or a concurrent writer won.
    pub fn compare_and_swap_breaker_state(
        &self,
        provider_id: &str,
        expected_version: i64,
        next: &BreakerStateUpdate,
    ) -> Result<Option<BreakerStateRow>, WarehouseError> {
        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;

        let result = swap_in_transaction(&connection, provider_id, expected_version, next);
        match finalize_transaction(&connection, result) {
            Err(WarehouseError::DuckDb(error)) if is_write_conflict(&error) => Ok(None),
            other => other,
        }
    }

    /// Every breaker row, ordered by provider id.
    pub fn list_breaker_states(&self) -> Result<Vec<BreakerStateRow>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(&format!("{SELECT_COLUMNS} ORDER BY provider_id"))?;
        let rows = statement
            .query_map([], map_breaker_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn swap_in_transaction(
    connection: &Connection,
    provider_id: &str,
    expected_version: i64,
    next: &BreakerStateUpdate,
) -> Result<Option<BreakerStateRow>, WarehouseError> {
    let changed = connection.execute(
        "UPDATE breaker_state SET \
             state = ?, \
             consecutive_failures = ?, \
             opened_at_ms = ?, \
             trial_claimed_at_ms = ?, \
             version = version + 1, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE provider_id = ? AND version = ?",
        params![
            next.state,
            next.consecutive_failures,
            next.opened_at_ms,
            next.trial_claimed_at_ms,
            provider_id,
            expected_version
        ],
    )?;

    if changed == 0 {
        return Ok(None);
    }

    select_breaker_state(connection, provider_id)
}

fn select_breaker_state(
    connection: &Connection,
    provider_id: &str,
) -> Result<Option<BreakerStateRow>, WarehouseError> {
    let mut statement = connection.prepare(&format!("{SELECT_COLUMNS} WHERE provider_id = ?"))?;
    let mut rows = statement.query(params![provider_id])?;
    let row = match rows.next()? {
        Some(row) => Some(map_breaker_row(row)?),
        None => None,
    };
    Ok(row)
}

fn map_breaker_row(row: &Row<'_>) -> Result<BreakerStateRow, ::duckdb::Error> {
    Ok(BreakerStateRow {
        provider_id: row.get(0)?,
        state: row.get(1)?,
        consecutive_failures: row.get(2)?,
        opened_at_ms: row.get(3)?,
        trial_claimed_at_ms: row.get(4)?,
        version: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp_warehouse;

    fn open_update(opened_at_ms: i64) -> BreakerStateUpdate {
        BreakerStateUpdate {
            state: String::from("open"),
            consecutive_failures: 5,
            opened_at_ms: Some(opened_at_ms),
            trial_claimed_at_ms: None,
        }
    }

    #[test]
    fn first_read_creates_closed_row_at_version_zero() {
        let (_temp, warehouse) = open_temp_warehouse();

        let row = warehouse.read_breaker_state("nse").expect("read");

        assert_eq!(row.provider_id, "nse");
        assert_eq!(row.state, "closed");
        assert_eq!(row.consecutive_failures, 0);
        assert_eq!(row.opened_at_ms, None);
        assert_eq!(row.version, 0);

        let again = warehouse.read_breaker_state("nse").expect("second read");
        assert_eq!(again, row);
    }

    #[test]
    fn swap_with_current_version_bumps_version() {
        let (_temp, warehouse) = open_temp_warehouse();
        warehouse.read_breaker_state("nse").expect("read");

        let swapped = warehouse
            .compare_and_swap_breaker_state("nse", 0, &open_update(1_700_000_000_000))
            .expect("swap")
            .expect("should swap");

        assert_eq!(swapped.state, "open");
        assert_eq!(swapped.consecutive_failures, 5);
        assert_eq!(swapped.opened_at_ms, Some(1_700_000_000_000));
        assert_eq!(swapped.version, 1);
    }

    #[test]
    fn swap_with_stale_version_changes_nothing() {
        let (_temp, warehouse) = open_temp_warehouse();
        warehouse.read_breaker_state("nse").expect("read");
        warehouse
            .compare_and_swap_breaker_state("nse", 0, &open_update(1))
            .expect("first swap")
            .expect("should swap");

        let stale = warehouse
            .compare_and_swap_breaker_state("nse", 0, &open_update(2))
            .expect("stale swap");

        assert!(stale.is_none());
        let row = warehouse.read_breaker_state("nse").expect("read back");
        assert_eq!(row.opened_at_ms, Some(1));
        assert_eq!(row.version, 1);
    }

    #[test]
    fn swap_on_missing_row_reports_conflict() {
        let (_temp, warehouse) = open_temp_warehouse();

        let result = warehouse
            .compare_and_swap_breaker_state("ghost", 0, &open_update(1))
            .expect("swap");

        assert!(result.is_none());
    }

    #[test]
    fn providers_are_isolated_and_listed_in_order() {
        let (_temp, warehouse) = open_temp_warehouse();
        warehouse.read_breaker_state("zeta").expect("read zeta");
        warehouse.read_breaker_state("alpha").expect("read alpha");
        warehouse
            .compare_and_swap_breaker_state("zeta", 0, &open_update(9))
            .expect("swap")
            .expect("should swap");

        let rows = warehouse.list_breaker_states().expect("list");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].provider_id, "alpha");
        assert_eq!(rows[0].state, "closed");
        assert_eq!(rows[1].provider_id, "zeta");
        assert_eq!(rows[1].state, "open");
    }
}
