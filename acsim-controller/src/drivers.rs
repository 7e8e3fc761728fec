//! Per-replica fault drivers.
//!
//! Each replica's command connection is driven by exactly one task for the
//! lifetime of the simulation. Replicas drawn into the faulty set of a
//! crash-model run get the one-shot permanent-down driver; everyone else —
//! including the Byzantine-eligible faulty set of a Byzantine-model run —
//! gets the unreliable driver, which toggles the replica up and down on a
//! Gamma(3,2) schedule.

use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Gamma};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use acsim_consensus::ReplicaId;
use acsim_core::SimulationParams;
use acsim_wire::{encode_frame, ControllerCommand};

use crate::board::FlagBoard;

const GAMMA_SHAPE: f64 = 3.0;
const GAMMA_SCALE: f64 = 2.0;
/// Longest stretch a replica is left down before coming back up.
const MAX_DOWN_SECS: f64 = 1.0;
/// Longest stretch a replica is left running between fault flips.
const MAX_UP_SECS: f64 = 10.0;

/// One replica's command connection, shared between its driver and the
/// final crash broadcast.
pub type CommandConnection = Arc<Mutex<TcpStream>>;

fn gamma_wait() -> f64 {
    let gamma = Gamma::new(GAMMA_SHAPE, GAMMA_SCALE).expect("gamma parameters are positive");
    gamma.sample(&mut rand::thread_rng())
}

/// Write one framed command; the caller decides what a failure means.
pub async fn send_command(
    connection: &CommandConnection,
    command: &ControllerCommand,
) -> anyhow::Result<()> {
    let frame = encode_frame(command)?;
    connection.lock().await.write_all(&frame).await?;
    Ok(())
}

/// Crash the replica after a single randomized delay.
pub async fn permanent_down_driver(
    replica_id: ReplicaId,
    connection: CommandConnection,
    done: FlagBoard,
) {
    let wait = gamma_wait().min(MAX_UP_SECS) + 2.0;
    sleep(Duration::from_secs_f64(wait)).await;

    info!(replica = replica_id, "crashing permanently-down replica");
    if let Err(e) = send_command(&connection, &ControllerCommand::crash()).await {
        warn!(replica = replica_id, error = %e, "crash command failed");
    }
    done.set(replica_id);
}

/// Toggle the replica's availability until it is done, flipping it Byzantine
/// with probability `byzantine_p` per tick when eligible.
pub async fn unreliable_driver(
    replica_id: ReplicaId,
    connection: CommandConnection,
    byzantine_eligible: bool,
    params: Arc<SimulationParams>,
    done: FlagBoard,
) {
    let mut is_down = false;
    let mut is_byzantine = false;

    loop {
        if done.is_set(replica_id) {
            break;
        }

        // Down stretches are kept short so the replica keeps participating.
        let cap = if is_down { MAX_DOWN_SECS } else { MAX_UP_SECS };
        let wait = gamma_wait().min(cap);
        sleep(Duration::from_secs_f64(wait)).await;

        is_down = !is_down;
        if byzantine_eligible
            && !is_byzantine
            && rand::thread_rng().gen::<f64>() < params.byzantine_p
        {
            // Byzantine means adversarial: from the convergence point of
            // view this replica is finished.
            is_byzantine = true;
            info!(replica = replica_id, "replica turned byzantine");
            done.set(replica_id);
        }

        let command = ControllerCommand { is_down, is_byzantine, is_permanent: false };
        if let Err(e) = send_command(&connection, &command).await {
            warn!(replica = replica_id, error = %e, "command connection broke, driver exiting");
            done.set(replica_id);
            break;
        }
    }
    info!(replica = replica_id, "fault driver exiting");
}
