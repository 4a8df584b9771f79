//! icerelay-server - Standalone headless streaming audio relay server.
//!
//! Provides ICY-compatible listener egress (plain, ICY-interleaved,
//! iceblock, FLV) and outbound relay pull from upstream Icecast-style
//! masters, with no GUI attached.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use icerelay_core::bootstrap_services;
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::ServerConfig;

/// icerelay-server - standalone streaming audio relay.
#[derive(Parser, Debug)]
#[command(name = "icerelay-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "ICERELAY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "ICERELAY_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("icerelay-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind={}:{}, {} mount(s), {} static relay(s), master_pull={}",
        config.bind_address,
        config.bind_port,
        config.mounts.len(),
        config.relays.len(),
        config.master_pull.is_some()
    );

    let daemon_config = config.to_daemon_config();
    let services = bootstrap_services(&daemon_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    services.spawn_background_tasks();

    log::info!("Background tasks started");

    let addr = SocketAddr::from((config.bind_address, config.bind_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let router = services.router.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server listening on {}", addr);

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;

    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
