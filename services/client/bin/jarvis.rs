//! Main Entrypoint for the JARVIS Terminal Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command-line flags.
//! 2. Initializing logging.
//! 3. Spawning the session task against the assistant backend.
//! 4. Rendering the conversation and avatar, and reading user commands.
//! 5. Shutting the session down cleanly on `/quit`, end of input, or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use jarvis_client::{
    config::{Config, validate_url},
    monitor::default_monitor,
    render::{Console, status_line},
    runtime::{SessionHandle, spawn_session},
};
use jarvis_core::session::SessionSnapshot;
use std::{
    io::Write,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "jarvis", version, about = "Terminal client for the JARVIS assistant")]
struct Args {
    /// Backend WebSocket URL. Overrides JARVIS_URL.
    #[arg(long)]
    url: Option<String>,

    /// Start with the microphone enabled. Overrides JARVIS_MIC.
    #[arg(long)]
    mic: bool,
}

const HELP: &str = "Type a message and press Enter. Commands: /send, /mic, /clear, /reconnect, /state, /quit";

/// Redraws the status line on every state change and on a short tick so the
/// avatar keeps moving.
async fn render_loop(mut updates: watch::Receiver<SessionSnapshot>) {
    let started = Instant::now();
    let mut console = Console::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        let snapshot = updates.borrow_and_update().clone();
        let mut out = std::io::stdout().lock();
        for line in console.update(&snapshot.conversation) {
            let _ = writeln!(out, "\r\x1b[2K{line}");
        }
        let _ = write!(out, "\r\x1b[2K{}", status_line(&snapshot, started.elapsed()));
        let _ = out.flush();
    }
}

/// Runs one line of user input. Returns `false` when the user asked to quit.
async fn run_command(handle: &SessionHandle, line: &str) -> bool {
    let result = match line {
        "" => Ok(()),
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("\r\x1b[2K{HELP}");
            Ok(())
        }
        // Retries the last line the backend could not take.
        "/send" => handle.submit().await,
        "/mic" => handle.toggle_mic(),
        "/clear" => handle.clear_conversation(),
        "/reconnect" => handle.reconnect(),
        "/state" => {
            match serde_json::to_string_pretty(&handle.snapshot()) {
                Ok(json) => println!("\r\x1b[2K{json}"),
                Err(e) => warn!(error = %e, "Failed to serialize session state."),
            }
            Ok(())
        }
        text => match handle.set_input(text) {
            Ok(()) => handle.submit().await,
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        warn!(error = %e, command = line, "Command failed.");
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(url) = args.url {
        validate_url(&url).context("Invalid --url")?;
        config.url = url;
    }
    if args.mic {
        config.mic_enabled = true;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        url = %config.url,
        backoff = ?config.backoff,
        max_reconnects = config.max_reconnects,
        mic = config.mic_enabled,
        "Configuration loaded. Starting session..."
    );

    // --- 3. Start the Session ---
    let (handle, task) = spawn_session(
        config.url.clone(),
        config.session_options(),
        default_monitor(),
    );
    let render = tokio::spawn(render_loop(handle.subscribe()));
    println!("{HELP}");

    // --- 4. Read Commands ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => {
                        if !run_command(&handle, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Shutting down gracefully...");
                break;
            }
        }
    }

    // --- 5. Shut Down ---
    handle.shutdown().await;
    task.await.context("Session task failed")?;
    render.abort();
    println!();
    info!("Client has shut down.");
    Ok(())
}
