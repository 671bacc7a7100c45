use std::sync::Arc;

use ferrogate_core::{
    ApiRequestFilter, ApiRequestRecord, BreakerStateRow, BreakerStore, ProviderAvailability,
    ProviderLatency, TelemetrySink, Warehouse, WarehouseBreakerStore, WarehouseConfig,
    WarehouseTelemetrySink,
};
#[cfg(feature = "postgres")]
use ferrogate_core::{PostgresBackend, PostgresConfig};
use serde_json::{json, Value};

use crate::error::CliError;

/// Where breaker state and the request log live for this invocation.
pub enum Backend {
    Warehouse(Warehouse),
    #[cfg(feature = "postgres")]
    Postgres {
        backend: PostgresBackend,
        config: PostgresConfig,
    },
}

impl Backend {
    /// Postgres when a database URL is configured, otherwise the local warehouse.
    pub async fn open(warehouse: WarehouseConfig) -> Result<Self, CliError> {
        #[cfg(feature = "postgres")]
        if let Some(config) = PostgresConfig::from_env()? {
            let backend = PostgresBackend::new(&config)?;
            backend.migrate().await?;
            tracing::debug!(url = %config.masked_url(), "using postgres backend");
            return Ok(Self::Postgres { backend, config });
        }

        let warehouse = Warehouse::open(warehouse)?;
        tracing::debug!(db_path = %warehouse.db_path().display(), "using duckdb backend");
        Ok(Self::Warehouse(warehouse))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Warehouse(_) => "duckdb",
            #[cfg(feature = "postgres")]
            Self::Postgres { .. } => "postgres",
        }
    }

    /// Connection details safe to print.
    pub fn describe(&self) -> Value {
        match self {
            Self::Warehouse(warehouse) => json!({
                "backend": self.name(),
                "home": warehouse.home().display().to_string(),
                "db_path": warehouse.db_path().display().to_string(),
            }),
            #[cfg(feature = "postgres")]
            Self::Postgres { config, .. } => json!({
                "backend": self.name(),
                "url": config.masked_url(),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn BreakerStore> {
        match self {
            Self::Warehouse(warehouse) => Arc::new(WarehouseBreakerStore::new(warehouse.clone())),
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Arc::new(backend.clone()),
        }
    }

    pub fn sink(&self) -> Arc<dyn TelemetrySink> {
        match self {
            Self::Warehouse(warehouse) => {
                Arc::new(WarehouseTelemetrySink::new(warehouse.clone()))
            }
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Arc::new(backend.clone()),
        }
    }

    /// Create tables and views if missing; returns the applied migration versions.
    pub async fn initialize(&self) -> Result<Vec<String>, CliError> {
        match self {
            Self::Warehouse(warehouse) => {
                warehouse.initialize()?;
                Ok(warehouse.applied_migrations()?)
            }
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => {
                backend.migrate().await?;
                Ok(Vec::new())
            }
        }
    }

    pub async fn list_breaker_states(&self) -> Result<Vec<BreakerStateRow>, CliError> {
        match self {
            Self::Warehouse(warehouse) => Ok(warehouse.list_breaker_states()?),
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Ok(backend.list_breaker_states().await?),
        }
    }

    pub async fn query_api_requests(
        &self,
        filter: &ApiRequestFilter,
    ) -> Result<Vec<ApiRequestRecord>, CliError> {
        match self {
            Self::Warehouse(warehouse) => Ok(warehouse.query_api_requests(filter)?),
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Ok(backend.query_api_requests(filter).await?),
        }
    }

    pub async fn provider_availability(
        &self,
        since_ms: Option<i64>,
    ) -> Result<Vec<ProviderAvailability>, CliError> {
        match self {
            Self::Warehouse(warehouse) => Ok(warehouse.provider_availability(since_ms)?),
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Ok(backend.provider_availability(since_ms).await?),
        }
    }

    pub async fn provider_latency(&self) -> Result<Vec<ProviderLatency>, CliError> {
        match self {
            Self::Warehouse(warehouse) => Ok(warehouse.provider_latency()?),
            #[cfg(feature = "postgres")]
            Self::Postgres { backend, .. } => Ok(backend.provider_latency().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warehouse_backend_reports_its_location() {
        let temp = tempfile::tempdir().expect("tempdir");
        let backend = Backend::Warehouse(
            Warehouse::open(WarehouseConfig::at_home(temp.path())).expect("warehouse"),
        );

        let described = backend.describe();

        assert_eq!(described["backend"], "duckdb");
        assert!(described["db_path"]
            .as_str()
            .is_some_and(|path| path.ends_with("gateway.duckdb")));
        assert!(!backend.initialize().await.expect("migrations").is_empty());
        assert!(backend.list_breaker_states().await.expect("rows").is_empty());
    }
}
