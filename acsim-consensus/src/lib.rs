//! # acsim Approximate-Consensus State Machines
//!
//! This crate implements the family of approximate-consensus algorithms the
//! testbed exercises: phase-indexed state machines that fold incoming peer
//! state reports into a local proposal value and drive a fleet of N replicas
//! toward ε-agreement while up to f replicas are crash-faulty or Byzantine.
//!
//! ## Design
//!
//! Every variant is a pure state machine: no I/O, no locking, no panics on
//! peer input. The replica runtime owns the single mutex that serializes
//! access; everything in this crate is plain synchronous code over owned
//! state. Malformed input is rejected by the wire decoder before it ever
//! reaches [`Algorithm::process_message`].
//!
//! ## Variants
//!
//! - [`Midpoint`] — midpoint averaging over a quorum of N−f reports.
//! - [`ArithmeticMean`] — running arithmetic mean with jump adoption of
//!   values from replicas in later phases.
//! - [`TrimmedMidpoint`] — Byzantine-tolerant trimmed midpoint requiring
//!   N > 5f, with a two-buffer current/next-phase classification.
//! - [`BinaryMajority`] — single-call binary rounds in the style of Ben-Or,
//!   crash model only.
//! - [`BenOr`] — the two-stage randomized binary protocol with per-phase
//!   buffering of early ("future") messages.
//! - [`Jacm86`] — trimmed midpoint over a per-phase receive matrix with
//!   retirement: finished peers' final values are latched into every
//!   remaining phase.
//!
//! All six share the [`ApproximateConsensus`] trait and are dispatched
//! through the tagged [`Algorithm`] enum, selected by [`AlgorithmKind`].

pub mod ben_or;
pub mod error;
pub mod jacm86;
pub mod majority;
pub mod mean;
pub mod midpoint;
pub mod stats;
pub mod trimmed;
pub mod types;

pub use ben_or::BenOr;
pub use error::AlgorithmError;
pub use jacm86::Jacm86;
pub use majority::BinaryMajority;
pub use mean::ArithmeticMean;
pub use midpoint::Midpoint;
pub use trimmed::TrimmedMidpoint;
pub use types::{
    Algorithm, AlgorithmConfig, AlgorithmKind, AlgorithmSnapshot, ApproximateConsensus,
    PeerUpdate, Phase, ReplicaId, Value,
};
