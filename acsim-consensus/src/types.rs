//! Core types for the approximate-consensus state machines.
//!
//! This module defines the identifiers and records shared by every algorithm
//! variant, the [`ApproximateConsensus`] trait they implement, and the tagged
//! [`Algorithm`] enum the replica runtime dispatches through.

use serde::{Deserialize, Serialize};

use crate::ben_or::BenOr;
use crate::error::AlgorithmError;
use crate::jacm86::Jacm86;
use crate::majority::BinaryMajority;
use crate::mean::ArithmeticMean;
use crate::midpoint::Midpoint;
use crate::trimmed::TrimmedMidpoint;

/// Index of a replica within the fleet, in `[0, N)`.
pub type ReplicaId = usize;

/// Monotonic per-replica round counter.
pub type Phase = u64;

/// Proposal scalar. Real-valued algorithms keep it in `[0, K]`; binary
/// algorithms use the bits 0.0 / 1.0, with -1.0 denoting "no majority
/// support" in the second stage.
pub type Value = f64;

/// The sentinel a binary stage-two buffer carries when the first stage found
/// no strict majority.
pub const NO_MAJORITY: Value = -1.0;

/// Algorithm selection, as spelled in the JSON parameter file.
///
/// The serialized names are part of the external interface (configuration
/// keys and archive directory names), so they are mapped explicitly rather
/// than derived from the variant identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AlgorithmKind {
    /// Midpoint averaging, crash model, N > 2f.
    Midpoint,
    /// Arithmetic mean with jump adoption, crash model, N > 2f.
    ArithmeticMean,
    /// Trimmed midpoint, Byzantine model, N > 5f.
    TrimmedMidpoint,
    /// Single-call binary rounds, crash model.
    BinaryMajority,
    /// Two-stage randomized binary protocol, crash model, N > 2f.
    BenOr,
    /// Trimmed midpoint over a per-phase matrix with retirement, N > 5f.
    Jacm86,
}

impl AlgorithmKind {
    /// The configuration spelling of this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::Midpoint => "algorithm_1",
            AlgorithmKind::ArithmeticMean => "algorithm_2",
            AlgorithmKind::TrimmedMidpoint => "algorithm_3",
            AlgorithmKind::BinaryMajority => "algorithm_4",
            AlgorithmKind::BenOr => "BenOr",
            AlgorithmKind::Jacm86 => "JACM86",
        }
    }

    /// Whether the variant tolerates Byzantine peers for the given fleet
    /// shape. The controller uses this to decide between a Byzantine and a
    /// permanently-down faulty set without constructing a state machine.
    pub fn supports_byzantine(&self, servers: usize, f: usize) -> bool {
        match self {
            AlgorithmKind::TrimmedMidpoint | AlgorithmKind::Jacm86 => servers > 5 * f,
            _ => false,
        }
    }
}

impl std::fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AlgorithmKind> for String {
    fn from(kind: AlgorithmKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TryFrom<String> for AlgorithmKind {
    type Error = AlgorithmError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl std::str::FromStr for AlgorithmKind {
    type Err = AlgorithmError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "algorithm_1" => Ok(AlgorithmKind::Midpoint),
            "algorithm_2" => Ok(AlgorithmKind::ArithmeticMean),
            "algorithm_3" => Ok(AlgorithmKind::TrimmedMidpoint),
            "algorithm_4" => Ok(AlgorithmKind::BinaryMajority),
            "BenOr" => Ok(AlgorithmKind::BenOr),
            "JACM86" => Ok(AlgorithmKind::Jacm86),
            other => Err(AlgorithmError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// The construction parameters every variant receives.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmConfig {
    /// Fleet size N.
    pub servers: usize,
    /// This replica's index in `[0, N)`.
    pub replica_id: ReplicaId,
    /// Fault budget f.
    pub f: usize,
    /// Agreement tolerance ε.
    pub eps: f64,
    /// Upper bound of the initial value range.
    pub k: f64,
}

/// One peer state report, as seen by a state machine.
///
/// This is the algorithm-facing projection of a wire-level peer message:
/// transport concerns (timestamps, padding) are stripped by the codec before
/// a report reaches [`ApproximateConsensus::process_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct PeerUpdate {
    /// Sender's replica index.
    pub id: ReplicaId,
    /// Sender's phase at the time of publication.
    pub p: Phase,
    /// Sender's proposal value.
    pub v: Value,
    /// Sender's stage-two support value, where the variant has one.
    pub w: Option<Value>,
    /// Sender's stage within the phase (1 or 2) for two-stage variants.
    pub stage: Option<u8>,
    /// Whether the sender has retired with `v` as its final value.
    pub is_done: bool,
}

impl PeerUpdate {
    /// A plain single-stage report carrying only a value.
    pub fn value(id: ReplicaId, p: Phase, v: Value) -> Self {
        Self { id, p, v, w: None, stage: None, is_done: false }
    }
}

/// A copy of the externally visible algorithm state, used for outbound peer
/// messages and controller reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmSnapshot {
    /// Current proposal.
    pub v: Value,
    /// Current phase.
    pub p: Phase,
    /// Stage-two support value, for the binary variants.
    #[serde(default)]
    pub w: Option<Value>,
    /// Stage within the phase (1 or 2), for the two-stage variants.
    #[serde(default)]
    pub stage: Option<u8>,
    /// ε-stability latch, for the real-valued variants.
    #[serde(default)]
    pub converged: Option<bool>,
    /// Termination predicate at snapshot time.
    pub is_done: bool,
}

/// Common contract of the six consensus variants.
///
/// Implementations are pure functions over their own state plus one incoming
/// report: they never perform I/O, never block, and never panic on peer
/// input.
pub trait ApproximateConsensus {
    /// Fold one peer report into local state. Returns `true` when the state
    /// advanced (a phase or stage completed, or a jump was accepted), which
    /// signals the runtime to emit a fresh broadcast and controller report.
    fn process_message(&mut self, update: &PeerUpdate) -> bool;

    /// Externally visible state for outbound messages and reports.
    fn snapshot(&self) -> AlgorithmSnapshot;

    /// Termination predicate. Latches: once true it stays true.
    fn is_done(&self) -> bool;

    /// Whether this variant tolerates Byzantine peers.
    fn supports_byzantine(&self) -> bool;

    /// Whether the runtime must broadcast on every advancement over reliable
    /// streams instead of periodically over UDP.
    fn requires_synchronous_update_broadcast(&self) -> bool;
}

/// Tagged dispatch over the six variants.
///
/// Each variant's state record lives in its own case; there is no shared
/// mutable base. The replica runtime holds exactly one `Algorithm` behind a
/// mutex.
#[derive(Debug, Clone)]
pub enum Algorithm {
    Midpoint(Midpoint),
    ArithmeticMean(ArithmeticMean),
    TrimmedMidpoint(TrimmedMidpoint),
    BinaryMajority(BinaryMajority),
    BenOr(BenOr),
    Jacm86(Jacm86),
}

impl Algorithm {
    /// Construct the selected variant with a randomly drawn initial value.
    ///
    /// Fails with [`AlgorithmError::InvalidConfiguration`] when the fleet
    /// shape does not satisfy the variant's quorum prerequisite.
    pub fn new(kind: AlgorithmKind, config: &AlgorithmConfig) -> Result<Self, AlgorithmError> {
        Self::build(kind, config, None)
    }

    /// Construct with an explicit initial value instead of a random draw.
    pub fn with_initial_value(
        kind: AlgorithmKind,
        config: &AlgorithmConfig,
        initial: Value,
    ) -> Result<Self, AlgorithmError> {
        Self::build(kind, config, Some(initial))
    }

    fn build(
        kind: AlgorithmKind,
        config: &AlgorithmConfig,
        initial: Option<Value>,
    ) -> Result<Self, AlgorithmError> {
        match kind {
            AlgorithmKind::Midpoint => Midpoint::new(config, initial).map(Algorithm::Midpoint),
            AlgorithmKind::ArithmeticMean => {
                ArithmeticMean::new(config, initial).map(Algorithm::ArithmeticMean)
            }
            AlgorithmKind::TrimmedMidpoint => {
                TrimmedMidpoint::new(config, initial).map(Algorithm::TrimmedMidpoint)
            }
            AlgorithmKind::BinaryMajority => {
                BinaryMajority::new(config, initial).map(Algorithm::BinaryMajority)
            }
            AlgorithmKind::BenOr => BenOr::new(config, initial).map(Algorithm::BenOr),
            AlgorithmKind::Jacm86 => Jacm86::new(config, initial).map(Algorithm::Jacm86),
        }
    }

    fn inner(&self) -> &dyn ApproximateConsensus {
        match self {
            Algorithm::Midpoint(a) => a,
            Algorithm::ArithmeticMean(a) => a,
            Algorithm::TrimmedMidpoint(a) => a,
            Algorithm::BinaryMajority(a) => a,
            Algorithm::BenOr(a) => a,
            Algorithm::Jacm86(a) => a,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ApproximateConsensus {
        match self {
            Algorithm::Midpoint(a) => a,
            Algorithm::ArithmeticMean(a) => a,
            Algorithm::TrimmedMidpoint(a) => a,
            Algorithm::BinaryMajority(a) => a,
            Algorithm::BenOr(a) => a,
            Algorithm::Jacm86(a) => a,
        }
    }
}

impl ApproximateConsensus for Algorithm {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        self.inner_mut().process_message(update)
    }

    fn snapshot(&self) -> AlgorithmSnapshot {
        self.inner().snapshot()
    }

    fn is_done(&self) -> bool {
        self.inner().is_done()
    }

    fn supports_byzantine(&self) -> bool {
        self.inner().supports_byzantine()
    }

    fn requires_synchronous_update_broadcast(&self) -> bool {
        self.inner().requires_synchronous_update_broadcast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_round_trip() {
        for kind in [
            AlgorithmKind::Midpoint,
            AlgorithmKind::ArithmeticMean,
            AlgorithmKind::TrimmedMidpoint,
            AlgorithmKind::BinaryMajority,
            AlgorithmKind::BenOr,
            AlgorithmKind::Jacm86,
        ] {
            assert_eq!(kind.as_str().parse::<AlgorithmKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_algorithm_name_is_rejected() {
        let err = "algorithm_9".parse::<AlgorithmKind>().unwrap_err();
        assert!(matches!(err, AlgorithmError::UnknownAlgorithm(_)));
    }

    #[test]
    fn byzantine_support_requires_five_f() {
        assert!(AlgorithmKind::TrimmedMidpoint.supports_byzantine(6, 1));
        assert!(!AlgorithmKind::TrimmedMidpoint.supports_byzantine(5, 1));
        assert!(AlgorithmKind::Jacm86.supports_byzantine(11, 2));
        assert!(!AlgorithmKind::Midpoint.supports_byzantine(100, 1));
    }
}
