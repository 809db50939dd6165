//! Process entry point.
//!
//! One binary, three roles (`ingest`, `aggregate`, `alert`) sharing a single
//! store file. Each role initializes only the components it needs; SIGINT
//! and SIGTERM broadcast a shutdown through a watch channel and every
//! long-running task drains before the store closes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use binance_feed_core::{AppConfig, ProcessRole};
use binance_feed_data::Database;
use clap::Parser;
use tokio::sync::watch;

mod roles;

#[derive(Parser)]
#[command(name = "binance-feed")]
#[command(about = "Binance market data acquisition pipeline", long_about = None)]
struct Cli {
    /// Process role: ingest, aggregate or alert. Falls back to
    /// BINANCE_PROCESS_ROLE, then to ingest.
    #[arg(long)]
    role: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;

    let role = match cli.role.as_deref() {
        Some(raw) => match ProcessRole::parse(raw) {
            Some(role) => role,
            None => bail!("unknown role '{raw}' (expected ingest, aggregate or alert)"),
        },
        None => config.process_role().unwrap_or(ProcessRole::Ingest),
    };

    tracing::info!(role = role.as_str(), db = %config.database_path, "starting");

    let db = Database::open(&config.database_path)
        .await
        .context("opening primary store")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let config = Arc::new(config);
    let result = match role {
        ProcessRole::Ingest => roles::run_ingest(config, db.clone(), shutdown_rx).await,
        ProcessRole::Aggregate => roles::run_aggregate(&config, db.clone(), shutdown_rx).await,
        ProcessRole::Alert => roles::run_alert(&config, db.clone(), shutdown_rx).await,
    };

    db.close().await;
    result?;

    tracing::info!("clean shutdown");
    Ok(())
}

/// Broadcasts shutdown on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut terminate =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::error!("failed to install SIGTERM handler: {e}");
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT received"),
                _ = terminate.recv() => tracing::info!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("interrupt received");
        }

        let _ = shutdown_tx.send(true);
    });
}
