//! lumio: self-hosted agent for BLEDOM-family BLE LED strips.
//!
//! One binary, no subcommands. Configuration comes from `./config.json`
//! (or `--config <path>`); a missing file means defaults. Exit code 0 on
//! clean shutdown, non-zero on unrecoverable configuration errors.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lumio_agent::{Agent, AgentConfig};

#[derive(Parser, Debug)]
#[command(name = "lumio", version, about = "Control agent for BLEDOM BLE LED strips")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./config.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = AgentConfig::load(&args.config).context("configuration error")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "lumio starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    Agent::new(config).run(shutdown).await;
    info!("graceful shutdown complete");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, stopping agent");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
