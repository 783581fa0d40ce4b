//! Emby relay (v1)
//!
//! A streaming reverse proxy for a single Emby server, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                    EMBY RELAY                    │
//!                        │                                                  │
//!     Client Request     │  ┌──────────┐    ┌──────────┐    ┌────────────┐  │
//!     ───────────────────┼─▶│  http    │───▶│ classify │───▶│ websocket  │◀─┼──── Upstream
//!                        │  │ server   │    │          │    │   relay    │  │     Emby
//!                        │  └──────────┘    └────┬─────┘    └────────────┘  │
//!                        │                       ▼                          │
//!     Client Response    │  ┌──────────┐    ┌──────────┐    ┌────────────┐  │
//!     ◀──────────────────┼──│ metered  │◀───│ response │◀───│  upstream  │◀─┼────
//!                        │  │  body    │    │transform │    │  client    │  │
//!                        │  └────┬─────┘    └──────────┘    └────────────┘  │
//!                        │       ▼                                          │
//!                        │  ┌──────────────────────────────────────────┐    │
//!                        │  │ accounting · config · lifecycle · admin  │    │
//!                        │  └──────────────────────────────────────────┘    │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use emby_relay::config::{load_config, RelayConfig};
use emby_relay::lifecycle::{wait_for_signal, Shutdown};
use emby_relay::observability::{logging, metrics};
use emby_relay::HttpServer;

#[derive(Parser)]
#[command(name = "emby-relay", version, about = "Streaming reverse proxy for an Emby server")]
struct Cli {
    /// Optional TOML config file. PORT and EMBY_SERVER override it.
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config problems are reported before logging exists and before binding.
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("emby-relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "emby-relay starting");
    tracing::info!(
        bind_address = %config.bind_address(),
        upstream = config.upstream.server.as_deref().unwrap_or_default(),
        connect_timeout_secs = config.timeouts.connect_secs,
        accounting = config.accounting.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config.clone(), shutdown.clone())?;

    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    server.run(listener).await?;
    Ok(())
}
