//! Controller process entry point.
//!
//! Runs the configured number of simulations: for each, it rendezvouses
//! with the fleet, drives faults, collects reports until termination, and
//! archives the result.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use acsim_controller::Controller;
use acsim_core::SimulationParams;

#[derive(Parser)]
#[command(name = "controller", about = "Approximate-consensus simulation controller")]
struct Args {
    /// Path to the JSON parameter file shared by the whole fleet.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let params = Arc::new(SimulationParams::load(&args.config).await?);
    info!(
        algorithm = %params.algorithm,
        servers = params.servers,
        f = params.f,
        n_simulations = params.n_simulations,
        "controller starting"
    );

    Controller::new(params).run().await
}
