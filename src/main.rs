//! upstream-proxy binary.
//!
//! Loads a TOML config, then proxies every request round robin across the
//! configured upstreams until Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use upstream_proxy::config::load_config;
use upstream_proxy::error::BoxError;
use upstream_proxy::http::middleware::{access_log, request_id};
use upstream_proxy::http::{shutdown_signal, Handler, HttpServer};
use upstream_proxy::middleware::HandlerChain;
use upstream_proxy::observability::{logging, metrics};
use upstream_proxy::proxy::Proxy;

#[derive(Debug, Parser)]
#[command(name = "upstream-proxy", version, about = "Streaming HTTP reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "upstream-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = config.upstreams.len(),
        retries = config.retries.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let proxy: Arc<dyn Handler> = Arc::new(Proxy::from_config(&config)?);
    let handler = HandlerChain::new()
        .with(request_id())
        .with(access_log())
        .compose(proxy);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    HttpServer::new(handler, config.buffer_pool.buffer_size)
        .run(listener, shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
