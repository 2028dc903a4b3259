//! Chaos gateway binary.
//!
//! Loads configuration, assembles the pipeline and serves until SIGINT or
//! SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use chaos_gateway::config::loader;
use chaos_gateway::lifecycle::{assemble, install_metrics, shutdown_signal, Shutdown};
use chaos_gateway::observability::logging;
use chaos_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "chaos-gateway")]
#[command(about = "API gateway with fault injection, rate limiting and request metrics", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = loader::load(args.config.as_deref())?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "chaos-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        chaos_service = %config.chaos.service_url,
        rate_limit_max = config.rate_limit.max_requests,
        rate_limit_window_ms = config.rate_limit.window_ms,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let prometheus = install_metrics(&config);
    let parts = assemble(&config, &shutdown, prometheus).await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.trigger();
    });

    GatewayServer::new(config, parts).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
