//! # Ferrogate Warehouse
//!
//! DuckDB-backed durable state for ferrogate.
//!
//! ## Overview
//!
//! The warehouse holds the two tables every gateway worker shares:
//!
//! - `breaker_state`: one row per provider, mutated only through versioned
//!   compare-and-swap (`UPDATE ... WHERE version = ?`).
//! - `api_request_log`: one immutable row per attempted upstream call.
//!
//! All statements carrying caller data are parameterized. The views below are
//! for dashboards and ad-hoc inspection with any `DuckDB` client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrogate_warehouse::{ApiRequestFilter, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!
//!     let state = warehouse.read_breaker_state("nse")?;
//!     println!("nse is {} (version {})", state.state, state.version);
//!
//!     let failures = warehouse.query_api_requests(&ApiRequestFilter {
//!         provider_id: Some("nse".to_string()),
//!         outcome: Some("failure".to_string()),
//!         ..ApiRequestFilter::default()
//!     })?;
//!     println!("{} failed calls", failures.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `breaker_state` | Per-provider circuit state with optimistic version |
//! | `api_request_log` | Request telemetry audit log |
//! | `schema_migrations` | Applied migration versions |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_provider_availability` | Success ratio per provider |
//! | `vw_provider_latency` | Latency of attempted calls per provider |
//! | `vw_recent_failures` | Failed and short-circuited attempts |
//! | `vw_breaker_overview` | Breaker rows with readable timestamps |

pub mod breaker_state;
pub mod duckdb;
pub mod migrations;
pub mod request_log;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use thiserror::Error;

pub use breaker_state::{BreakerStateRow, BreakerStateUpdate};
pub use crate::duckdb::{ConnectionPool, PooledConnection};
pub use request_log::{ApiRequestFilter, ApiRequestRecord, ProviderAvailability, ProviderLatency};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Query arguments were rejected before reaching the database.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// A row could not be read back after it was written.
    #[error("row for '{key}' is missing after write")]
    MissingRow { key: String },
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for ferrogate data.
    pub ferrogate_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::at_home(resolve_ferrogate_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit home directory.
    pub fn at_home(ferrogate_home: impl Into<PathBuf>) -> Self {
        let ferrogate_home = ferrogate_home.into();
        let db_path = ferrogate_home.join("state").join("gateway.duckdb");
        Self {
            ferrogate_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Shared handle to the gateway database. Cheap to clone.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse under `FERROGATE_HOME`.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open (creating if needed) the database and apply migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply migrations and (re)create views. Idempotent.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    /// Migration versions recorded in the database.
    pub fn applied_migrations(&self) -> Result<Vec<String>, WarehouseError> {
        let connection = self.pool.acquire()?;
        let mut statement =
            connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let versions = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn home(&self) -> &Path {
        self.config.ferrogate_home.as_path()
    }

    pub(crate) fn connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.pool.acquire()?)
    }
}

/// Commit on success, roll back on failure.
pub(crate) fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                let _ = connection.execute_batch("ROLLBACK");
                Err(error.into())
            }
        },
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Whether a `DuckDB` error reports a concurrent write on the same row or key.
pub(crate) fn is_write_conflict(error: &::duckdb::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("conflict") || message.contains("duplicate key")
}

fn resolve_ferrogate_home() -> PathBuf {
    if let Some(path) = env::var_os("FERROGATE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".ferrogate");
    }

    PathBuf::from(".ferrogate")
}
