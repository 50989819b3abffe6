//! # Permagate Node Runtime
//!
//! Entry point for the gateway: load configuration from the environment,
//! install logging and metrics, then wire and run the ingestion pipeline
//! and HTTP facade.

mod adapters;
mod container;
mod wiring;

use anyhow::Context;
use container::GatewayConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("reading configuration")?;
    gateway_telemetry::init_logging(config.log_format)
        .map_err(|e| anyhow::anyhow!("installing logger: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting permagate gateway"
    );

    wiring::run(config).await
}
