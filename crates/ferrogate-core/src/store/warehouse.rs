use std::future::Future;
use std::pin::Pin;

use ferrogate_warehouse::{Warehouse, WarehouseError};

use super::{decode_row, encode_update, encode_version, BreakerStore, CasOutcome, StoreError};
use crate::{BreakerRecord, ProviderId};

/// Breaker state in the warehouse `breaker_state` table.
///
/// Every process that opens the same warehouse shares these rows. Calls run on
/// the blocking pool.
#[derive(Clone)]
pub struct WarehouseBreakerStore {
    warehouse: Warehouse,
}

impl WarehouseBreakerStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

impl BreakerStore for WarehouseBreakerStore {
    fn read<'a>(
        &'a self,
        provider: &'a ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<BreakerRecord, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let warehouse = self.warehouse.clone();
            let provider_id = provider.to_string();
            let row = tokio::task::spawn_blocking(move || {
                warehouse.read_breaker_state(&provider_id)
            })
            .await
            .map_err(|error| StoreError::unavailable(format!("store task failed: {error}")))?
            .map_err(unavailable)?;
            decode_row(&row)
        })
    }

    fn compare_and_swap<'a>(
        &'a self,
        provider: &'a ProviderId,
        expected_version: u64,
        next: &'a BreakerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let warehouse = self.warehouse.clone();
            let provider_id = provider.to_string();
            let expected = encode_version(expected_version)?;
            let update = encode_update(next);

            let swapped = tokio::task::spawn_blocking(move || {
                warehouse.compare_and_swap_breaker_state(&provider_id, expected, &update)
            })
            .await
            .map_err(|error| StoreError::unavailable(format!("store task failed: {error}")))?
            .map_err(unavailable)?;

            match swapped {
                Some(row) => decode_row(&row).map(CasOutcome::Swapped),
                None => Ok(CasOutcome::Conflict),
            }
        })
    }
}

fn unavailable(error: WarehouseError) -> StoreError {
    StoreError::unavailable(error.to_string())
}
