use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use super::{BreakerStore, CasOutcome, StoreError};
use crate::{BreakerRecord, ProviderId};

/// Process-local store. Shared by every `RequestMaker` holding the same instance.
#[derive(Debug, Default)]
pub struct MemoryBreakerStore {
    records: Mutex<HashMap<ProviderId, BreakerRecord>>,
}

impl MemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record, version included.
    pub fn seed(&self, provider: &ProviderId, record: BreakerRecord) {
        self.records
            .lock()
            .expect("breaker store mutex poisoned")
            .insert(provider.clone(), record);
    }

    pub fn snapshot(&self, provider: &ProviderId) -> Option<BreakerRecord> {
        self.records
            .lock()
            .expect("breaker store mutex poisoned")
            .get(provider)
            .cloned()
    }
}

impl BreakerStore for MemoryBreakerStore {
    fn read<'a>(
        &'a self,
        provider: &'a ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<BreakerRecord, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut records = self
                .records
                .lock()
                .map_err(|_| StoreError::unavailable("breaker store mutex poisoned"))?;
            let record = records.entry(provider.clone()).or_default().clone();
            record.validate().map_err(|reason| StoreError::Corrupt {
                provider: provider.to_string(),
                reason,
            })?;
            Ok(record)
        })
    }

    fn compare_and_swap<'a>(
        &'a self,
        provider: &'a ProviderId,
        expected_version: u64,
        next: &'a BreakerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut records = self
                .records
                .lock()
                .map_err(|_| StoreError::unavailable("breaker store mutex poisoned"))?;
            let Some(current) = records.get_mut(provider) else {
                return Ok(CasOutcome::Conflict);
            };
            if current.version != expected_version {
                return Ok(CasOutcome::Conflict);
            }

            *current = BreakerRecord {
                version: expected_version + 1,
                ..next.clone()
            };
            Ok(CasOutcome::Swapped(current.clone()))
        })
    }
}
