//! Runs a Courier worker until interrupted.
//!
//! Configuration comes from `COURIER_*` environment variables (and `.env`).

use courier::prelude::*;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Worker exited with an error");
        eprintln!("courier-worker: {e}");
        std::process::exit(1);
    }
}

async fn run() -> courier::Result<()> {
    init_logging(&LogSettings::from_env()?)?;

    let config = CourierConfig::from_env()?;
    info!(config = ?config, "Loaded configuration");

    let courier = Courier::connect(config).await?;
    let worker = courier.http_worker()?;
    worker.start().await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown signal received");
    worker.shutdown().await?;
    courier.shutdown();
    Ok(())
}
