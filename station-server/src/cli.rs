use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use station_core::{Config, backup::create_backup, predict::weather_prediction};
use tokio::net::TcpListener;
use tracing::info;

use crate::{api, state::AppState};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "station", version, about = "Home weather station backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the REST API and Telegram webhook server (default).
    Serve,

    /// Write a database backup to a file.
    Backup {
        /// Destination path, e.g. "station-backup.db".
        out: PathBuf,
    },

    /// Print a prediction from the latest stored reading.
    Predict,

    /// Print the path of the configuration file.
    ConfigPath,
}

impl Cli {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => serve(config).await?,
            Command::Backup { out } => {
                let state = AppState::from_config(&config)?;
                let dir = out
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."));
                let backup = create_backup(&state.store, &dir)?;
                let path = backup.persist(&out)?;
                println!("Backup written to {}", path.display());
            }
            Command::Predict => {
                let state = AppState::from_config(&config)?;
                let p = weather_prediction(&state.store, &state.model)?;
                let rain = if p.predicted_rain { "rain expected" } else { "no rain" };
                println!("Predicted temperature: {:.1} °C, {rain}", p.predicted_temp);
            }
            Command::ConfigPath => {
                println!("{}", Config::config_file_path()?.display());
            }
        }

        Ok(())
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let prefix = config.normalized_prefix();
    let app = api::router(state, &prefix);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, prefix = %prefix, "station server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("station server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["station"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn backup_takes_output_path() {
        let cli = Cli::parse_from(["station", "backup", "out/station.db"]);
        match cli.command {
            Some(Command::Backup { out }) => assert_eq!(out, PathBuf::from("out/station.db")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_path_subcommand_is_kebab_case() {
        let cli = Cli::parse_from(["station", "config-path"]);
        assert!(matches!(cli.command, Some(Command::ConfigPath)));
    }

    #[tokio::test]
    async fn backup_command_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: dir.path().join("live.db").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let out = dir.path().join("copy.db");

        Cli { command: Some(Command::Backup { out: out.clone() }) }
            .run(config)
            .await
            .unwrap();

        assert!(out.exists());
    }
}
