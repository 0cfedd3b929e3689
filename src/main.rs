//! Spaceship Realtime Server
//!
//! Accepts game client WebSocket connections and serves each one as a session
//! with keep-alive and backpressure handling.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use spaceship_realtime::config::Config;
use spaceship_realtime::server::{ServerConfig, WebSocketServer};

/// Spaceship Realtime Server
///
/// WebSocket connection server for the realtime game backend
#[derive(Parser, Debug)]
#[command(name = "spaceship-realtime")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the TOML config file
    #[arg(short, long, default_value = "spaceship.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Spaceship Realtime v{}", env!("CARGO_PKG_VERSION"));

    let file_config = Config::load(&args.config)?;
    let bind = args.bind.unwrap_or(file_config.server.bind);
    let port = args.port.unwrap_or(file_config.server.port);

    info!(
        ping_period_ms = file_config.socket.ping_period_ms,
        pong_wait_ms = file_config.socket.pong_wait_ms,
        outgoing_queue_size = file_config.socket.outgoing_queue_size,
        "Socket settings loaded from {}",
        args.config.display()
    );

    let config = ServerConfig::new(bind, port).with_socket(file_config.socket);

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
