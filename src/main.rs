use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use canvas_bridge::bridge::{Bridge, BridgeConfig, DEFAULT_PORT};

// ── CLI argument parsing ─────────────────────────────────────────

/// Standalone bridge server: runs the plugin listener without any outer
/// tool layer, keeping the connection alive for external dispatchers.
#[derive(Parser)]
#[command(name = "canvas-bridge", about = "Command bridge for the canvas design host", version)]
struct Cli {
    /// Port for the plugin WebSocket listener
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Per-command reply timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Log filter (RUST_LOG overrides this)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)),
        )
        .init();

    let bridge = Bridge::new(BridgeConfig {
        port: cli.port,
        request_timeout: Duration::from_secs(cli.timeout_secs),
    });

    let port = match bridge.start().await {
        Ok(port) => port,
        Err(e) => {
            error!(error = %e, "failed to start the plugin listener");
            process::exit(1);
        }
    };
    info!("listening on ws://127.0.0.1:{port}");
    info!("waiting for the design host plugin to connect");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for shutdown signal");
    }
    info!("shutting down");
    bridge.stop().await;
}
