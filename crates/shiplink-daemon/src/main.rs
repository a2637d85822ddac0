//! shiplink-daemon - deploy-on-build service for connected runtimes

use anyhow::{Context, Result};
use clap::Parser;
use shiplink_daemon::{Daemon, MemoryLink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// shiplink daemon - rebuild on change and deploy into the connected runtime
#[derive(Parser, Debug)]
#[command(name = "shiplink-daemon")]
#[command(about = "Rebuilds on source changes and deploys the output into the connected runtime")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        shiplink_core::logging::init();
    }

    info!("shiplink daemon starting...");

    // Determine home and current directories for config resolution
    let home_dir =
        shiplink_core::home::get_home_dir().context("Failed to determine home directory")?;
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let overrides = shiplink_core::config::ConfigOverrides {
        config_path: args.config.clone(),
    };
    let config = shiplink_core::resolve_config(&overrides, &current_dir, &home_dir)
        .context("Failed to resolve configuration")?;

    if let Some(config_path) = args.config {
        info!("Loaded config from: {}", config_path.display());
    }

    // The standalone binary runs against the in-process loopback link, with
    // the loopback client attached up front. That exercises the full
    // pipeline (builds, pushes, mirrors, distribution) without a live
    // runtime; embedders provide a real link through the library API.
    let link = Arc::new(MemoryLink::new());
    link.connect_client();
    info!("Using in-process loopback link");

    let daemon = Daemon::new(config, link);

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up signal handlers
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to create SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received SIGINT (Ctrl+C)");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    daemon
        .run(cancel_token)
        .await
        .context("Daemon event loop failed")?;

    info!("shiplink daemon shutdown complete");
    Ok(())
}
