mod bridge;
mod command;
mod config;
mod error;
mod hardware;
mod ws;

use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "touch-ws-bridge", about = "Forward button and touch-pad events to a WebSocket server")]
struct Cli {
    /// Server name, with port and path, for the WebSocket server (overrides BRIDGE_SERVER)
    #[arg(short = 's', long = "socket")]
    socket: Option<String>,

    /// Run with simulated hardware driven from stdin
    #[arg(short = 'e', long = "test")]
    test: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match config::Config::from_env(cli.socket.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting touch-ws-bridge (server={}, mode={:?}, pin={}, edge={:?}, debounce={:?}{})",
        config.server.url,
        config.hardware.mode,
        config.hardware.pin,
        config.hardware.edge,
        config.hardware.debounce,
        if cli.test { ", test mode" } else { "" },
    );
    if config.hardware.mode == config::BridgeMode::Touch {
        info!("  {} touch pads mapped", config.hardware.keymap.len());
    }

    // Hardware must be up before anything touches the network.
    let hardware = match hardware::open(&config, cli.test) {
        Ok(h) => h,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let bridge = match bridge::Bridge::new(&config, hardware) {
        Ok(b) => b,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            } => info!("Received SIGTERM, shutting down"),
        }
    };

    if let Err(e) = bridge.run(shutdown).await {
        error!("Bridge stopped: {}", e);
        std::process::exit(1);
    }
    info!("touch-ws-bridge stopped");
}
