use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use ferrogate_warehouse::Warehouse;

use super::{TelemetryEntry, TelemetryError, TelemetrySink};

/// In-process sink. Keeps every entry for inspection.
#[derive(Debug, Default)]
pub struct MemoryTelemetrySink {
    entries: Mutex<Vec<TelemetryEntry>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TelemetryEntry> {
        self.entries
            .lock()
            .expect("telemetry sink mutex poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("telemetry sink mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn append<'a>(
        &'a self,
        entry: &'a TelemetryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>> {
        Box::pin(async move {
            self.entries
                .lock()
                .map_err(|_| TelemetryError::sink("memory sink mutex poisoned"))?
                .push(entry.clone());
            Ok(())
        })
    }
}

/// Appends to the warehouse `api_request_log` table.
#[derive(Clone)]
pub struct WarehouseTelemetrySink {
    warehouse: Warehouse,
}

impl WarehouseTelemetrySink {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl TelemetrySink for WarehouseTelemetrySink {
    fn append<'a>(
        &'a self,
        entry: &'a TelemetryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>> {
        Box::pin(async move {
            let warehouse = self.warehouse.clone();
            let record = entry.to_record();
            tokio::task::spawn_blocking(move || warehouse.append_api_request(&record))
                .await
                .map_err(|error| TelemetryError::sink(format!("telemetry task failed: {error}")))?
                .map_err(|error| TelemetryError::sink(error.to_string()))
        })
    }
}
