//! Edge guard service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──▶ request id ──▶ trace ──▶ timeout ──▶ admission ──▶ CSRF ──▶ handler
//!                                               │              │         │
//!                                               ▼              ▼         ▼
//!                                         per-client map   cache /   bearer check
//!                                          (DashMap)       memory    (secret pair)
//!
//!     Background: rotation scheduler (cleanup → rotate), metrics exporter
//!     Shared:     resilient cache (Connected | Degraded)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use edge_guard::cache::redact_url;
use edge_guard::config::loader::load_or_default;
use edge_guard::lifecycle::signals::trigger_on_signal;
use edge_guard::observability::{logging, metrics};
use edge_guard::{HttpServer, Services, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "edge-guard", version, about = "Request admission and credential guard")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_or_default(args.config.as_deref())?;

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-guard starting");

    let cache_target = config
        .cache
        .url
        .as_deref()
        .map(redact_url)
        .unwrap_or_else(|| "none".to_string());
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache = %cache_target,
        request_timeout_secs = config.timeouts.request_secs,
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

    let bind_address = config.listener.bind_address.clone();
    let services = Services::build(config).await?;

    let shutdown = Arc::new(Shutdown::new());
    let scheduler = tokio::spawn(services.scheduler().run(shutdown.subscribe()));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        trigger_on_signal(&signal_shutdown).await;
    });

    let listener = TcpListener::bind(&bind_address).await?;
    let server = HttpServer::new(&services);
    let result = server.run(listener, shutdown.wait()).await;

    // Covers the server exiting on its own.
    shutdown.trigger();
    if let Err(e) = scheduler.await {
        tracing::error!(error = %e, "Rotation scheduler task failed");
    }
    services.cache.close().await;

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}
