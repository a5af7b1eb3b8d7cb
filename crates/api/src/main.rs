//! Proctoring Service - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::load().context("Failed to load configuration")?;
    init_logging(&config.log_level, config.json_logs).context("Failed to initialise logging")?;

    info!("=== Proctoring Service v{} ===", env!("CARGO_PKG_VERSION"));

    run_server(config).await
}
