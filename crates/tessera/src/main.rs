//! Tessera: a node of a partitioned, replicated key-value cluster.

use anyhow::{Context, Result};
use clap::Parser;
use tessera::NodeLifecycle;
use tessera_core::config::{Config, LogFormat};
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.home {
        Some(home) => Config::load_from_home(home)
            .with_context(|| format!("Failed to load configuration from {}", home.display()))?,
        None => Config::load_from_env().context("Failed to load configuration")?,
    };

    init_logging(&config);

    let node = NodeLifecycle::new(config).context("Failed to construct node")?;
    if let Err(e) = node.start().await {
        // Release whatever did start before reporting.
        if let Err(stop_err) = node.stop().await {
            tracing::error!(error = %stop_err, "Failed to stop node after startup failure");
        }
        return Err(e).context("Failed to start node");
    }

    info!(
        node_id = node.identity().id(),
        host = node.identity().host(),
        socket_port = node.identity().socket_port(),
        admin_port = node.identity().admin_port(),
        "Tessera node is running"
    );

    shutdown_signal().await;

    node.stop().await.context("Failed to stop node cleanly")?;
    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
