//! Main Entrypoint for the JARVIS Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command-line flags.
//! 2. Initializing logging.
//! 3. Binding the relay with the echo responder.
//! 4. Serving clients and handling graceful shutdown.

use anyhow::Context;
use clap::Parser;
use jarvis_relay::{Relay, config::Config, responder::EchoResponder};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Local backend for the JARVIS assistant")]
struct Args {
    /// Address to listen on. Overrides RELAY_BIND_ADDRESS.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        bind_address = %config.bind_address,
        audio_tick_ms = config.audio_tick.as_millis() as u64,
        "Configuration loaded. Starting relay..."
    );

    // --- 3. Bind ---
    let responder = Arc::new(EchoResponder::new(config.chunk_delay));
    let relay = Relay::bind(config, responder).await?;

    // --- 4. Serve ---
    relay.run(shutdown_signal()).await
}
