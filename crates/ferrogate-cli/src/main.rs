mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(error) = run().await {
        if !matches!(error, CliError::Reported { .. }) {
            eprintln!("error: {error}");
        }
        std::process::exit(error.exit_code());
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("FERROGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let envelope = commands::run(&cli).await?;
    output::render(&envelope, cli.format, cli.pretty)?;

    if !envelope.errors.is_empty() {
        return Err(CliError::Reported {
            error_count: envelope.errors.len(),
        });
    }

    Ok(())
}
