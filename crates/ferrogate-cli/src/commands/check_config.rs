use std::path::PathBuf;

use ferrogate_core::{GatewayConfig, ProviderSettings, WarehouseConfig};
#[cfg(feature = "postgres")]
use ferrogate_core::PostgresConfig;
use serde_json::{json, Map, Value};

use crate::error::CliError;

use super::CommandResult;

#[cfg(not(feature = "postgres"))]
const DATABASE_URL_VAR: &str = "FERROGATE_DATABASE_URL";

/// Resolves storage and breaker settings without opening any connection.
pub fn run(
    config_path: Option<PathBuf>,
    config: &GatewayConfig,
    warehouse: &WarehouseConfig,
) -> Result<CommandResult, CliError> {
    let (database, mut warnings) = database_summary(warehouse)?;

    let mut providers = Map::new();
    providers.insert("defaults".to_owned(), settings_summary(&config.defaults));
    for (provider, settings) in &config.providers {
        providers.insert(provider.as_str().to_owned(), settings_summary(settings));
    }
    let scopes = std::iter::once(("defaults", &config.defaults)).chain(
        config
            .providers
            .iter()
            .map(|(provider, settings)| (provider.as_str(), settings)),
    );
    warnings.extend(scopes.filter_map(|(scope, settings)| timeout_warning(scope, settings)));

    let data = json!({
        "config_path": config_path.map(|path| path.display().to_string()),
        "database": database,
        "providers": providers,
    });

    Ok(warnings
        .into_iter()
        .fold(CommandResult::ok(data), CommandResult::with_warning))
}

fn duckdb_summary(warehouse: &WarehouseConfig) -> Value {
    json!({
        "backend": "duckdb",
        "home": warehouse.ferrogate_home.display().to_string(),
        "db_path": warehouse.db_path.display().to_string(),
        "exists": warehouse.db_path.is_file(),
    })
}

#[cfg(feature = "postgres")]
fn database_summary(warehouse: &WarehouseConfig) -> Result<(Value, Vec<String>), CliError> {
    let summary = match PostgresConfig::from_env()? {
        Some(postgres) => json!({
            "backend": "postgres",
            "url": postgres.masked_url(),
            "host": postgres.host,
            "port": postgres.port,
            "database": postgres.database,
            "user": postgres.user,
        }),
        None => duckdb_summary(warehouse),
    };
    Ok((summary, Vec::new()))
}

#[cfg(not(feature = "postgres"))]
fn database_summary(warehouse: &WarehouseConfig) -> Result<(Value, Vec<String>), CliError> {
    let mut warnings = Vec::new();
    if std::env::var_os(DATABASE_URL_VAR).is_some_and(|value| !value.is_empty()) {
        warnings.push(format!(
            "{DATABASE_URL_VAR} is set but this build lacks postgres support; using duckdb"
        ));
    }
    Ok((duckdb_summary(warehouse), warnings))
}

fn settings_summary(settings: &ProviderSettings) -> Value {
    json!({
        "max_failures": settings.breaker.max_failures,
        "reset_timeout_ms": settings.breaker.reset_timeout_ms(),
        "request_timeout_ms": millis(settings.request_timeout),
        "trial_lease_ms": millis(settings.trial_lease()),
        "failure_statuses": settings.failure_statuses.to_string(),
        "max_cas_attempts": settings.cas_retry.max_attempts,
    })
}

/// A trial that can outlive the cooldown is only kept exclusive by the lease.
fn timeout_warning(scope: &str, settings: &ProviderSettings) -> Option<String> {
    (settings.request_timeout >= settings.breaker.reset_timeout).then(|| {
        format!(
            "{scope}: request_timeout_ms ({}) is not shorter than reset_timeout_ms ({}); \
             half-open trials hold their claim for {} ms",
            millis(settings.request_timeout),
            settings.breaker.reset_timeout_ms(),
            millis(settings.trial_lease()),
        )
    })
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
