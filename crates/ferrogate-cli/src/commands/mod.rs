mod availability;
mod backend;
mod breaker;
mod call;
mod check_config;
mod init;
mod telemetry;

pub use backend::Backend;

use std::path::PathBuf;
use std::time::Instant;

use ferrogate_core::{
    Envelope, EnvelopeError, EnvelopeMeta, GatewayConfig, ProviderId, WarehouseConfig,
};
use serde_json::Value;
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::error::CliError;

const SCHEMA_VERSION: &str = "v1.0.0";
const DEFAULT_CONFIG_FILE: &str = "gateway.toml";

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub providers: Vec<ProviderId>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_error(mut self, error: EnvelopeError) -> Self {
        self.errors.push(error);
        self
    }
}

/// Storage backend and breaker configuration shared by every command.
pub struct Context {
    pub backend: Backend,
    pub config: GatewayConfig,
}

impl Context {
    async fn open(warehouse: WarehouseConfig, config: GatewayConfig) -> Result<Self, CliError> {
        let backend = Backend::open(warehouse).await?;
        tracing::debug!(
            backend = backend.name(),
            configured_providers = config.providers.len(),
            "command context ready"
        );
        Ok(Self { backend, config })
    }
}

/// The explicit `--config` path, else `gateway.toml` under the home when present.
fn config_source(cli: &Cli, warehouse: &WarehouseConfig) -> Option<PathBuf> {
    pick_config(
        cli.config.clone(),
        warehouse.ferrogate_home.join(DEFAULT_CONFIG_FILE),
    )
}

/// An explicit path must exist; the default file is optional.
fn pick_config(explicit: Option<PathBuf>, fallback: PathBuf) -> Option<PathBuf> {
    explicit.or_else(|| fallback.is_file().then_some(fallback))
}

fn load_config(source: Option<PathBuf>) -> Result<GatewayConfig, CliError> {
    match source {
        Some(path) => Ok(GatewayConfig::load(&path)?),
        None => Ok(GatewayConfig::default()),
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let started = Instant::now();
    let warehouse = WarehouseConfig::default();
    let config_path = config_source(cli, &warehouse);
    let config = load_config(config_path.clone())?;

    let command_result = match &cli.command {
        Command::CheckConfig => check_config::run(config_path, &config, &warehouse)?,
        Command::Init => {
            let context = Context::open(warehouse, config).await?;
            init::run(&context).await?
        }
        Command::Call(args) => {
            let context = Context::open(warehouse, config).await?;
            call::run(args, cli.timeout_ms, &context).await?
        }
        Command::Breaker(command) => {
            let context = Context::open(warehouse, config).await?;
            breaker::run(command, &context).await?
        }
        Command::Telemetry(args) => {
            let context = Context::open(warehouse, config).await?;
            telemetry::run(args, &context).await?
        }
        Command::Availability(args) => {
            let context = Context::open(warehouse, config).await?;
            availability::run(args, &context).await?
        }
    };

    let CommandResult {
        data,
        warnings,
        errors,
        providers,
    } = command_result;

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut meta =
        EnvelopeMeta::new(Uuid::new_v4().to_string(), SCHEMA_VERSION, providers, latency_ms)?;
    for warning in warnings {
        meta.push_warning(warning);
    }

    Envelope::with_errors(meta, data, errors).map_err(CliError::from)
}

pub fn parse_provider(input: &str) -> Result<ProviderId, CliError> {
    Ok(ProviderId::parse(input)?)
}

/// `now - minutes`, in unix milliseconds.
pub fn since_minutes_ago(minutes: Option<u64>) -> Option<i64> {
    minutes.map(|minutes| {
        let window = i64::try_from(minutes.saturating_mul(60_000)).unwrap_or(i64::MAX);
        ferrogate_core::UtcDateTime::now()
            .unix_millis()
            .saturating_sub(window)
    })
}
