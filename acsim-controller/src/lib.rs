//! # acsim Simulation Controller
//!
//! One controller drives each simulation: it picks the faulty set, opens the
//! rendezvous all replicas register at, releases the fleet with the start
//! command, injects faults on randomized schedules, collects every state
//! report, detects stable ε-agreement, and finally crashes the fleet and
//! archives the run.
//!
//! ## Task model
//!
//! Per simulation the controller runs one fault driver per replica plus one
//! report collector. Fault drivers own nothing but their replica's command
//! connection; the collector owns the UDP report socket. The done bitmap is
//! the only cross-task state and sits behind its own lock.

pub mod board;
pub mod collector;
pub mod controller;
pub mod drivers;
pub mod persist;

pub use board::FlagBoard;
pub use collector::{AgreementDetector, ReceivedReport};
pub use controller::Controller;
pub use persist::SimulationRecord;
