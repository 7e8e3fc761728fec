//! Replica process entry point.
//!
//! A replica begins down and waits for the controller's start command, then
//! participates in the consensus rounds until it terminates or is crashed.
//! An invalid (N, f) configuration exits with code 22 before any socket is
//! opened.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use acsim_consensus::AlgorithmError;
use acsim_core::SimulationParams;
use acsim_replica::ReplicaRuntime;

/// Exit code reserved for an invalid (N, f) configuration.
const EXIT_INVALID_CONFIGURATION: i32 = 22;

#[derive(Parser)]
#[command(name = "replica", about = "One approximate-consensus replica")]
struct Args {
    /// Path to the JSON parameter file shared by the whole fleet.
    config: PathBuf,

    /// This replica's index in [0, N).
    replica_id: usize,
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
        replica = args.replica_id,
        algorithm = %params.algorithm,
        "replica starting"
    );

    if let Err(e) = ReplicaRuntime::new(params, args.replica_id).run().await {
        if matches!(
            e.downcast_ref::<AlgorithmError>(),
            Some(AlgorithmError::InvalidConfiguration { .. })
        ) {
            error!(error = %e, "invalid fleet configuration");
            std::process::exit(EXIT_INVALID_CONFIGURATION);
        }
        return Err(e);
    }
    Ok(())
}
