//! Resilience layer service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client request ──▶ http server ──▶ ResilienceLayer
//!                                          │
//!                                          ▼
//!                          ┌────────────────────────────────┐
//!                          │ per backend:                   │
//!                          │   RateLimitedQueue             │
//!                          │     → CircuitBreaker gate      │
//!                          │     → BackendCaller (HTTP)     │──▶ speech-to-text
//!                          │     → classify / plan / execute│──▶ text-to-speech
//!                          │     → FallbackResponder        │──▶ conversational-ai
//!                          └────────────────────────────────┘
//!                                          │
//!     Client response ◀── primary result, fallback, or error body
//!
//!     Cross-cutting: config, events → health monitor, metrics, logging
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use resilience_layer::config::{load_config, ResilienceConfig};
use resilience_layer::observability::{logging, metrics};
use resilience_layer::{HttpBackendCaller, HttpServer, ResilienceLayer};

#[derive(Parser)]
#[command(name = "resilience-layer")]
#[command(about = "Rate-limited, circuit-broken gateway to external AI backends", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("resilience-layer v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        config_file = ?args.config,
        request_timeout_secs = config.server.request_timeout_secs,
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

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let caller = Arc::new(HttpBackendCaller::from_config(&config));
    let layer = Arc::new(ResilienceLayer::new(config, caller));
    let server = HttpServer::new(layer.clone());

    server.run(listener, shutdown_signal()).await?;

    layer.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl+C received, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}
