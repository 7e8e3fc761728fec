//! Error surface of the consensus crate.
//!
//! Both variants are fatal at construction time: the state machines
//! themselves never fail once built.

use thiserror::Error;

/// Errors raised while selecting or constructing an algorithm variant.
#[derive(Debug, Error)]
pub enum AlgorithmError {
    /// The fleet shape does not satisfy the variant's quorum prerequisite.
    /// The process exits with code 22 when this surfaces from a binary.
    #[error("invalid configuration: N={servers}, f={f} does not satisfy {requirement}")]
    InvalidConfiguration {
        servers: usize,
        f: usize,
        requirement: &'static str,
    },

    /// The configured algorithm name is not in the supported set.
    #[error("unknown algorithm {0:?}")]
    UnknownAlgorithm(String),
}
