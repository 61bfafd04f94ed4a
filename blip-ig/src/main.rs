//! BLIP Ingest (blip-ig) - Main entry point
//!
//! Bus-side process: consumes RawEvents, archives them, decodes what it
//! can, and maintains the device inventory. This binary wires the pieces
//! together; the default input is a JSON-lines feed on stdin (one
//! RawEvent per line, the same shape the scanner publishes), which also
//! serves to replay archived captures.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blip_common::config::Config;
use blip_common::db::init_database;
use blip_common::metrics::PipelineCounters;
use blip_common::types::RawEvent;
use blip_ig::decoders::ibeacon::IBeaconDecoder;
use blip_ig::decoders::xiaomi::XiaomiDecoder;
use blip_ig::repo::SqliteEventStore;
use blip_ig::transport::AckHandle;
use blip_ig::{Decoder, DecoderRegistry, Delivery, ProcessingPipeline};

/// Command-line arguments for blip-ig
#[derive(Parser, Debug)]
#[command(name = "blip-ig")]
#[command(about = "Ingest and processing pipeline for BLIP")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "BLIP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured database path
    #[arg(long, env = "BLIP_DATABASE")]
    database: Option<PathBuf>,
}

/// Settlement handle for stdin deliveries. Stdin has no redelivery, so
/// a requeue can only be logged for the operator to replay later.
struct StdinAckHandle {
    event_id: uuid::Uuid,
}

#[async_trait::async_trait]
impl AckHandle for StdinAckHandle {
    async fn ack(self: Box<Self>) {}

    async fn requeue(self: Box<Self>) {
        warn!(event_id = %self.event_id, "event requeued with no redelivery source; replay it manually");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blip_ig=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(path) = args.database {
        config.database.path = path;
    }

    info!(database = %config.database.path.display(), "starting BLIP ingest");

    let pool = init_database(&config.database.path)
        .await
        .context("database initialization failed")?;
    let store = Arc::new(SqliteEventStore::new(pool));

    // Registration order is classification order
    let registry = Arc::new(
        DecoderRegistry::with_decoders(vec![
            Arc::new(XiaomiDecoder) as Arc<dyn Decoder>,
            Arc::new(IBeaconDecoder) as Arc<dyn Decoder>,
        ])
        .context("decoder registration failed")?,
    );
    info!(decoders = registry.len(), "decoder registry built");

    let counters = Arc::new(PipelineCounters::new());
    let pipeline = ProcessingPipeline::new(
        registry,
        store,
        Arc::clone(&counters),
        &config.pipeline,
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("stdin read failed")? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        let event: RawEvent = match serde_json::from_str(&line) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!("skipping undeserializable line: {}", e);
                                continue;
                            }
                        };
                        let handle = Box::new(StdinAckHandle { event_id: event.id });
                        pipeline.dispatch(Delivery::new(event, handle))
                            .await
                            .context("pipeline dispatch failed")?;
                    }
                    None => {
                        info!("input exhausted");
                        break;
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    pipeline.shutdown().await;

    let snap = counters.snapshot();
    info!(
        archived = snap.archived,
        decoded = snap.decoded,
        no_decoder = snap.no_decoder,
        decode_failed = snap.decode_failed,
        "ingest shutdown complete"
    );
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
