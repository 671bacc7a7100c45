//! CLI argument definitions for Ferrogate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the database schema and apply migrations |
//! | `call` | Perform one circuit-breaker-guarded HTTP call |
//! | `breaker` | List, show or reset shared breaker state |
//! | `telemetry` | Query the request log for one provider |
//! | `availability` | Summarize success ratios and latency per provider |
//! | `check-config` | Show resolved storage and provider settings without connecting |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$FERROGATE_HOME/gateway.toml` | Breaker configuration file |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--timeout-ms` | provider setting | Request timeout for `call` |
//!
//! # Examples
//!
//! ```bash
//! ferrogate init
//! ferrogate call nse "https://api.example.com/quotes?symbol=INFY" -H "accept:application/json"
//! ferrogate breaker show nse --pretty
//! ferrogate telemetry nse --outcome short-circuited --since-minutes 30
//! ferrogate check-config --format table
//! ```
//!
//! Built with the `postgres` feature, every command except `check-config` uses the
//! server named by `FERROGATE_DATABASE_URL` (or a `postgres://` `DATABASE_URL`)
//! instead of the local warehouse.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Circuit-breaker gateway for unreliable market-data providers
#[derive(Debug, Parser)]
#[command(
    name = "ferrogate",
    author,
    version,
    about = "Circuit-breaker gateway for unreliable market-data providers",
    long_about = "Ferrogate guards calls to third-party HTTP providers with a circuit breaker \
whose state is shared through a local DuckDB warehouse or a Postgres server, and records \
one telemetry row per attempted call.\n\
\n\
Set FERROGATE_HOME to relocate the warehouse, FERROGATE_DATABASE_URL to use Postgres \
(postgres builds only) and FERROGATE_LOG to change log verbosity."
)]
pub struct Cli {
    /// Breaker configuration (TOML). Falls back to `gateway.toml` under the home directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Request timeout in milliseconds; overrides the provider's configured timeout.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text for terminals.
    Table,
    /// Single JSON envelope.
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database schema and apply migrations.
    Init,
    /// Perform one guarded HTTP call.
    Call(CallArgs),
    /// Inspect or reset breaker state.
    #[command(subcommand)]
    Breaker(BreakerCommand),
    /// Query the request log for a provider.
    Telemetry(TelemetryArgs),
    /// Summarize availability per provider.
    Availability(AvailabilityArgs),
    /// Print resolved storage and breaker settings. Never connects.
    CheckConfig,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Provider id, e.g. `nse`.
    pub provider: String,

    /// Absolute http(s) URL.
    pub url: String,

    #[arg(long, short = 'X', value_enum, default_value_t = MethodArg::Get)]
    pub method: MethodArg,

    /// Request header as `name:value`. Repeatable.
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Request body.
    #[arg(long)]
    pub body: Option<String>,

    /// Correlation id for the telemetry row; generated when omitted.
    #[arg(long)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

#[derive(Debug, Subcommand)]
pub enum BreakerCommand {
    /// List every stored breaker.
    List,
    /// Show one provider's breaker.
    Show(BreakerArgs),
    /// Force a provider's breaker closed.
    Reset(BreakerArgs),
}

#[derive(Debug, Args)]
pub struct BreakerArgs {
    pub provider: String,
}

#[derive(Debug, Args)]
pub struct TelemetryArgs {
    pub provider: String,

    #[arg(long, value_enum)]
    pub outcome: Option<OutcomeArg>,

    /// Only entries started within the last N minutes.
    #[arg(long)]
    pub since_minutes: Option<u64>,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutcomeArg {
    Success,
    Failure,
    ShortCircuited,
}

#[derive(Debug, Args)]
pub struct AvailabilityArgs {
    /// Only entries started within the last N minutes. Latency always covers the
    /// whole log.
    #[arg(long)]
    pub since_minutes: Option<u64>,
}
