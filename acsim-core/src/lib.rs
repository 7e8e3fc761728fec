//! # acsim Core Configuration
//!
//! Simulation parameters shared by every process in a run. The controller
//! and all replicas load the same JSON parameter file, so this crate is the
//! single source of truth for what that file contains, which values are
//! legal, and how socket addresses are derived from it.

pub mod config;

pub use config::SimulationParams;
