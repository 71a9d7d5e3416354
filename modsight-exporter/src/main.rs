//! Pull-based Prometheus exporter for Modbus devices.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use modsight_engine::bus::ScrapeEngine;
use modsight_engine::transport::TokioModbusFactory;
use modsight_exporter::config::Config;
use modsight_exporter::http::{self, AppState};
use modsight_exporter::telemetry::Telemetry;

/// Pull-based Prometheus exporter for Modbus devices (TCP/RTU).
#[derive(Parser, Debug)]
#[command(name = "modsight-exporter")]
#[command(about = "Scrapes Modbus devices on demand and serves the registers as metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short, long, default_value = "modbus.yml")]
    config: PathBuf,

    /// Override the listen address from the configuration file.
    #[arg(long)]
    listen_address: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level)?;

    info!("Starting modsight-exporter");
    info!(
        "Loaded {} module(s) from {:?}",
        config.modules.len(),
        args.config
    );

    let addr: SocketAddr = args
        .listen_address
        .as_deref()
        .unwrap_or(&config.listen.address)
        .parse()
        .with_context(|| "Invalid listen address")?;

    let state = AppState {
        config: Arc::new(config),
        engine: Arc::new(ScrapeEngine::new(Arc::new(TokioModbusFactory))),
        telemetry: Arc::new(Telemetry::default()),
    };

    http::serve(state, addr).await
}

/// Initialize tracing, honoring `RUST_LOG` over the configured level.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}
