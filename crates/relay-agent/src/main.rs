//! # relay
//!
//! Session relay binary: loads settings, sets up logging and metrics, and
//! runs the HTTP/WebSocket server until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_logging::LoggingConfig;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;

/// How long background tasks get to wind down after ctrl-c.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Session relay server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "Session-mediated WebSocket relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$RELAY_CONFIG` or `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `relay_core=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, mut settings: RelaySettings) -> Result<RelaySettings> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn load(cli: &Cli) -> Result<RelaySettings> {
    match &cli.config {
        Some(path) => load_from(cli, path, |key| std::env::var(key).ok()),
        None => {
            let settings = relay_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    relay_settings::settings_path().display()
                )
            })?;
            cli.apply(settings)
        }
    }
}

fn load_from(
    cli: &Cli,
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RelaySettings> {
    let settings = relay_settings::load_settings_with_env(path, env)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    relay_logging::init_logging(&LoggingConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        ..LoggingConfig::default()
    })
    .context("Failed to initialize logging")?;

    let metrics = relay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(ServerConfig::from_settings(&settings), Some(metrics));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        max_age_secs = settings.sessions.max_age_secs,
        sweep_interval_secs = settings.sessions.sweep_interval_secs,
        "relay listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop(Some(SHUTDOWN_TIMEOUT)).await;
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
