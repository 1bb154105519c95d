//! Binary crate for the `station` server.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - The REST API over `station-core`
//! - The Telegram bot webhook

use anyhow::Context;
use clap::Parser;
use station_core::Config;
use tracing::info;

mod api;
mod cli;
mod state;
mod telegram;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %Config::environment(),
        "station starting"
    );

    cmd.run(config).await
}

/// Log to stderr; `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;

    let fallback = config
        .log_filter
        .clone()
        .unwrap_or_else(|| "station=info,station_core=info,tower_http=info,warn".to_string());

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
