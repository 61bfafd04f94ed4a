//! BLIP Scanner (blip-sc) - Main entry point
//!
//! Edge process: reads advertisements from the radio driver boundary,
//! runs them through the admission filter, and publishes admitted events
//! onto the message bus. This binary wires the pieces together; the
//! default input is a JSON-lines feed on stdin (the replay format), which
//! is also how archived captures are re-fed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blip_common::config::Config;
use blip_common::metrics::AdmissionCounters;
use blip_sc::app::ScannerApp;
use blip_sc::source::JsonLineSource;
use blip_sc::transport::EventSink;
use blip_sc::{AdmissionFilter, Denylist};

/// Command-line arguments for blip-sc
#[derive(Parser, Debug)]
#[command(name = "blip-sc")]
#[command(about = "Edge scanner process for BLIP")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "BLIP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured scanner id
    #[arg(long, env = "BLIP_SCANNER_ID")]
    scanner_id: Option<String>,
}

/// Sink that logs publishes instead of talking to a broker. Stands in
/// until a bus client binding is wired; the transport is a collaborator.
struct LoggingSink;

#[async_trait::async_trait]
impl EventSink for LoggingSink {
    async fn publish(&self, channel: &str, payload: &[u8]) -> blip_common::Result<()> {
        info!(channel, bytes = payload.len(), "publish");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blip_sc=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(id) = args.scanner_id {
        config.scanner.id = id;
    }

    info!(scanner_id = %config.scanner.id, "starting BLIP scanner");

    // Denylist compilation is fatal on bad patterns, before any scanning
    let denylist = Denylist::compile(&config.denylist).context("invalid denylist")?;
    let counters = Arc::new(AdmissionCounters::new());
    let filter = Arc::new(AdmissionFilter::new(
        &config.admission,
        denylist,
        Arc::clone(&counters),
    ));

    let sink: Arc<dyn EventSink> = Arc::new(LoggingSink);
    let app = ScannerApp::new(config, filter, sink, counters);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut source = JsonLineSource::new(BufReader::new(tokio::io::stdin()));
    app.run(&mut source, shutdown_rx)
        .await
        .context("scanner run failed")?;

    info!("scanner shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
