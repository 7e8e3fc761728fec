//! The replica runtime: three long-lived activities plus a supervisor.
//!
//! - **Broadcaster** publishes the algorithm's state to the fleet, either on
//!   a timer (UDP mode) or whenever the state advances (TCP mesh mode).
//! - **Receiver** pulls peer frames, folds them into the state machine, and
//!   reports every advancement to the controller.
//! - **Controller handler** applies fault commands to the replica state.
//!
//! All three exit once the done flag latches; the supervisor additionally
//! latches it if any activity dies early, so a single failure brings the
//! replica down instead of wedging it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use acsim_consensus::{Algorithm, ApproximateConsensus, ReplicaId};
use acsim_core::SimulationParams;
use acsim_wire::{decode_frame, encode_frame, PeerMessage, StateReport};

use crate::link::{CommandStream, ControllerLink, LinkError, ReportChannel};
use crate::state::ReplicaState;
use crate::transport::{self, PeerReceiver, PeerSender};

/// Peer reads wake at least this often to re-check termination.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Controller reads wake more often; the crash command arrives here.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
/// How often the supervisor looks at its activities.
const SUPERVISOR_PERIOD: Duration = Duration::from_millis(500);

type SharedAlgorithm = Arc<Mutex<Algorithm>>;

/// One replica's complete runtime.
pub struct ReplicaRuntime {
    params: Arc<SimulationParams>,
    replica_id: ReplicaId,
}

impl ReplicaRuntime {
    pub fn new(params: Arc<SimulationParams>, replica_id: ReplicaId) -> Self {
        Self { params, replica_id }
    }

    /// Run the replica to completion.
    ///
    /// Construction of the state machine happens first so that an invalid
    /// (N, f) configuration surfaces before any socket is opened.
    pub async fn run(self) -> anyhow::Result<()> {
        let params = self.params;
        let replica_id = self.replica_id;

        let algorithm = Algorithm::new(params.algorithm, &params.algorithm_config(replica_id))?;
        let sync_mode = algorithm.requires_synchronous_update_broadcast();
        let byzantine_capable = algorithm.supports_byzantine();
        let algorithm: SharedAlgorithm = Arc::new(Mutex::new(algorithm));

        let state = ReplicaState::new();
        let (commands, reports) = ControllerLink::connect(&params, replica_id).await?;
        let (sender, receiver) = if sync_mode {
            transport::tcp_mesh(&params, replica_id).await?
        } else {
            transport::udp(&params).await?
        };

        // Tell the controller we are registered and running; the start
        // command arrives once the whole fleet has said so.
        let ready = {
            let snapshot = algorithm.lock().snapshot();
            let status = state.snapshot();
            StateReport::new(replica_id, &snapshot, status.is_down, status.is_byzantine, false)
                .ready()
        };
        reports.send(&ready).await;
        info!(replica = replica_id, sync_mode, "replica runtime starting");

        // Advancements and down-to-up transitions kick the event-driven
        // broadcaster; the channel closes when both producers exit.
        let (kick_tx, kick_rx) = mpsc::unbounded_channel();

        let handles = vec![
            tokio::spawn(broadcaster(
                params.clone(),
                replica_id,
                algorithm.clone(),
                state.clone(),
                sender,
                kick_rx,
                sync_mode,
                byzantine_capable,
            )),
            tokio::spawn(receiver_loop(
                params.clone(),
                replica_id,
                algorithm.clone(),
                state.clone(),
                receiver,
                reports.clone(),
                kick_tx.clone(),
                sync_mode,
            )),
            tokio::spawn(controller_loop(replica_id, commands, state.clone(), kick_tx, sync_mode)),
        ];

        supervise(replica_id, handles, state).await;
        info!(replica = replica_id, "replica finished");
        Ok(())
    }
}

/// Watch the three activities; if one dies while the replica is not done,
/// latch done so the others stop too, then join everything.
async fn supervise(replica_id: ReplicaId, handles: Vec<JoinHandle<()>>, state: ReplicaState) {
    loop {
        tokio::time::sleep(SUPERVISOR_PERIOD).await;
        let finished = handles.iter().filter(|h| h.is_finished()).count();
        if finished == handles.len() {
            break;
        }
        if finished > 0 && !state.is_finished() {
            error!(replica = replica_id, "an activity exited early, shutting the replica down");
            state.latch_done();
        }
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!(replica = replica_id, error = %e, "activity panicked");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn broadcaster(
    params: Arc<SimulationParams>,
    replica_id: ReplicaId,
    algorithm: SharedAlgorithm,
    state: ReplicaState,
    mut sender: PeerSender,
    mut kick: mpsc::UnboundedReceiver<()>,
    sync_mode: bool,
    byzantine_capable: bool,
) {
    if sync_mode {
        // Event-driven: one broadcast per advancement or up-transition.
        while kick.recv().await.is_some() {
            if state.is_finished() {
                break;
            }
            emit(&params, replica_id, &algorithm, &state, &mut sender, byzantine_capable).await;
        }
    } else {
        let mut ticker = tokio::time::interval(Duration::from_millis(params.broadcast_period));
        loop {
            ticker.tick().await;
            if state.is_finished() {
                break;
            }
            emit(&params, replica_id, &algorithm, &state, &mut sender, byzantine_capable).await;
        }
    }
    info!(replica = replica_id, "exiting broadcaster");
}

/// Publish the current state to the fleet, honoring the fault flags: a down
/// replica is silent, a Byzantine one drops each peer independently.
async fn emit(
    params: &SimulationParams,
    replica_id: ReplicaId,
    algorithm: &SharedAlgorithm,
    state: &ReplicaState,
    sender: &mut PeerSender,
    byzantine_capable: bool,
) {
    let status = state.snapshot();
    if status.is_down {
        return;
    }

    let snapshot = algorithm.lock().snapshot();
    let message = PeerMessage::from_snapshot(replica_id, &snapshot);
    let frame = match encode_frame(&message) {
        Ok(frame) => frame,
        Err(e) => {
            error!(replica = replica_id, error = %e, "could not encode peer message");
            return;
        }
    };

    if status.is_byzantine && byzantine_capable {
        // Send-omission: each peer misses this broadcast with probability
        // byzantine_send_p.
        let targets: Vec<ReplicaId> = {
            let mut rng = rand::thread_rng();
            (0..params.servers)
                .filter(|id| *id != replica_id && rng.gen::<f64>() > params.byzantine_send_p)
                .collect()
        };
        debug!(replica = replica_id, reached = targets.len(), "byzantine broadcast");
        sender.send_to(&frame, &targets).await;
    } else {
        sender.broadcast(&frame).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn receiver_loop(
    params: Arc<SimulationParams>,
    replica_id: ReplicaId,
    algorithm: SharedAlgorithm,
    state: ReplicaState,
    mut receiver: PeerReceiver,
    reports: Arc<ReportChannel>,
    kick: mpsc::UnboundedSender<()>,
    sync_mode: bool,
) {
    let mut signaled_controller = false;
    loop {
        if state.is_finished() {
            break;
        }

        let frame = match receiver.recv(RECEIVE_TIMEOUT).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(replica = replica_id, "timed out on peer read");
                continue;
            }
            Err(e) => {
                error!(replica = replica_id, error = %e, "peer transport failed");
                state.latch_done();
                break;
            }
        };

        let message: PeerMessage = match decode_frame(&frame) {
            Ok(message) => message,
            Err(_) => continue,
        };
        if message.id == replica_id {
            continue;
        }
        // Simulated loss.
        if rand::thread_rng().gen::<f64>() < params.drop_rate {
            continue;
        }

        let status = state.snapshot();
        if status.is_done {
            break;
        }
        if status.is_down {
            debug!(replica = replica_id, "down, skipping peer message");
            continue;
        }

        let (advanced, snapshot) = {
            let mut algorithm = algorithm.lock();
            let advanced = algorithm.process_message(&message.update());
            (advanced, algorithm.snapshot())
        };

        if advanced {
            let report = StateReport::new(
                replica_id,
                &snapshot,
                status.is_down,
                status.is_byzantine,
                status.is_done,
            );
            reports.send(&report).await;
            if sync_mode {
                let _ = kick.send(());
            }
        }

        if snapshot.is_done && !signaled_controller {
            info!(replica = replica_id, "letting the controller know we are done");
            let report = StateReport::new(
                replica_id,
                &snapshot,
                status.is_down,
                status.is_byzantine,
                true,
            );
            reports.send(&report).await;
            signaled_controller = true;
        }
    }
    info!(replica = replica_id, "exiting receiver");
}

async fn controller_loop(
    replica_id: ReplicaId,
    mut commands: CommandStream,
    state: ReplicaState,
    kick: mpsc::UnboundedSender<()>,
    sync_mode: bool,
) {
    loop {
        match commands.recv(COMMAND_TIMEOUT).await {
            Err(LinkError::Timeout) => {
                if state.is_finished() {
                    break;
                }
            }
            Err(LinkError::NoData) => {}
            Err(LinkError::ConnectionLost(e)) => {
                error!(replica = replica_id, error = %e, "controller connection lost");
                state.latch_done();
                break;
            }
            Ok(command) => {
                let was_down = state.snapshot().is_down;
                state.apply(&command);
                info!(
                    replica = replica_id,
                    is_down = command.is_down,
                    is_byzantine = command.is_byzantine,
                    is_permanent = command.is_permanent,
                    "state update from controller"
                );
                if command.is_permanent {
                    info!(replica = replica_id, "received crash command");
                    break;
                }
                // A replica coming back up has to announce itself in
                // event-driven mode, or a freshly started fleet stays silent.
                if sync_mode && was_down && !command.is_down {
                    let _ = kick.send(());
                }
            }
        }
    }
    info!(replica = replica_id, "exiting controller handler");
}
