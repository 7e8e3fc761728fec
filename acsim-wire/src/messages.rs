//! The records that travel between processes.
//!
//! Three flows exist: peer-to-peer state broadcasts, controller-to-replica
//! fault commands, and replica-to-controller state reports. A fourth record,
//! the registration hello, is sent exactly once per replica when its command
//! connection opens.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use acsim_consensus::{AlgorithmSnapshot, PeerUpdate, Phase, ReplicaId, Value};

/// Milliseconds since the epoch, the timestamp unit carried on the wire.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A replica's published state, broadcast to its peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Sender's replica index.
    pub id: ReplicaId,
    /// Sender's phase.
    pub p: Phase,
    /// Sender's proposal.
    pub v: Value,
    /// Stage-two support value, for the binary variants.
    #[serde(default)]
    pub w: Option<Value>,
    /// Stage within the phase (1 or 2), for the two-stage variants.
    #[serde(default, rename = "phase")]
    pub stage: Option<u8>,
    /// Whether the sender has retired with `v` as its final value.
    pub is_done: bool,
    /// When the sender produced this state, in epoch milliseconds.
    pub time_generated: i64,
}

impl PeerMessage {
    /// Publish an algorithm snapshot, stamped now.
    pub fn from_snapshot(id: ReplicaId, snapshot: &AlgorithmSnapshot) -> Self {
        Self {
            id,
            p: snapshot.p,
            v: snapshot.v,
            w: snapshot.w,
            stage: snapshot.stage,
            is_done: snapshot.is_done,
            time_generated: now_millis(),
        }
    }

    /// The algorithm-facing projection of this message.
    pub fn update(&self) -> PeerUpdate {
        PeerUpdate {
            id: self.id,
            p: self.p,
            v: self.v,
            w: self.w,
            stage: self.stage,
            is_done: self.is_done,
        }
    }
}

/// A fault-status command from the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControllerCommand {
    pub is_down: bool,
    pub is_byzantine: bool,
    /// A permanent down command is a crash: the replica latches done.
    pub is_permanent: bool,
}

impl ControllerCommand {
    /// The command that starts the simulation: everyone up, honest.
    pub fn start() -> Self {
        Self { is_down: false, is_byzantine: false, is_permanent: false }
    }

    /// The crash command that forces a replica to exit.
    pub fn crash() -> Self {
        Self { is_down: true, is_byzantine: false, is_permanent: true }
    }
}

/// A replica's state report to the controller: the algorithm snapshot joined
/// with the replica's fault state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateReport {
    pub id: ReplicaId,
    pub p: Phase,
    pub v: Value,
    #[serde(default)]
    pub w: Option<Value>,
    #[serde(default, rename = "phase")]
    pub stage: Option<u8>,
    #[serde(default)]
    pub converged: Option<bool>,
    pub is_down: bool,
    pub is_byzantine: bool,
    pub is_done: bool,
    /// Set on the single report announcing the runtime is up and registered.
    #[serde(default)]
    pub ready: bool,
    pub time_generated: i64,
}

impl StateReport {
    /// Assemble a report from the two per-replica state records.
    pub fn new(
        id: ReplicaId,
        snapshot: &AlgorithmSnapshot,
        is_down: bool,
        is_byzantine: bool,
        is_done: bool,
    ) -> Self {
        Self {
            id,
            p: snapshot.p,
            v: snapshot.v,
            w: snapshot.w,
            stage: snapshot.stage,
            converged: snapshot.converged,
            is_down,
            is_byzantine,
            is_done: snapshot.is_done || is_done,
            ready: false,
            time_generated: now_millis(),
        }
    }

    /// Mark this as the readiness announcement.
    pub fn ready(mut self) -> Self {
        self.ready = true;
        self
    }
}

/// The first record on a freshly opened command connection, telling the
/// controller which replica it is talking to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterHello {
    pub id: ReplicaId,
}
