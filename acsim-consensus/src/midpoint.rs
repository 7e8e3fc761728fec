//! Midpoint averaging over a quorum of N−f peer values.
//!
//! Each round collects one value per peer; once N−f slots are filled the
//! proposal moves to the midpoint of the collected values, the phase
//! advances, and the buffer resets with the replica's own slot
//! pre-populated. Crash model only; requires N > 2f.

use rand::Rng;
use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::filled;
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
};

#[derive(Debug, Clone)]
pub struct Midpoint {
    servers: usize,
    replica_id: ReplicaId,
    f: usize,
    eps: f64,
    v: Value,
    p: Phase,
    p_end: f64,
    converged: bool,
    r: Vec<Option<Value>>,
}

impl Midpoint {
    pub(crate) fn new(
        config: &AlgorithmConfig,
        initial: Option<Value>,
    ) -> Result<Self, AlgorithmError> {
        if config.servers <= 2 * config.f {
            return Err(AlgorithmError::InvalidConfiguration {
                servers: config.servers,
                f: config.f,
                requirement: "N > 2f",
            });
        }

        let v = initial.unwrap_or_else(|| rand::thread_rng().gen_range(0.0..=config.k));
        let ratio = config.f as f64 / (config.servers - config.f) as f64;
        let p_end = (config.eps / config.k).ln() / ratio.ln();

        let mut algorithm = Self {
            servers: config.servers,
            replica_id: config.replica_id,
            f: config.f,
            eps: config.eps,
            v,
            p: 0,
            p_end,
            converged: false,
            r: Vec::new(),
        };
        algorithm.reset();
        info!(
            replica = algorithm.replica_id,
            p_end, "replica will terminate after p_end phases"
        );
        Ok(algorithm)
    }

    fn reset(&mut self) {
        self.r = vec![None; self.servers];
        self.r[self.replica_id] = Some(self.v);
    }
}

impl ApproximateConsensus for Midpoint {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        if self.r[update.id].is_some() {
            return false;
        }
        self.r[update.id] = Some(update.v);

        let values = filled(&self.r);
        if values.len() < self.servers - self.f {
            return false;
        }

        // Quorum reached: advance to the midpoint of the collected values,
        // latching convergence once every value sits within eps/2 of ours.
        if values.iter().all(|x| (x - self.v).abs() <= self.eps / 2.0) {
            self.converged = true;
        } else {
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            self.v = (max + min) / 2.0;
        }
        self.p += 1;
        self.reset();
        debug!(replica = self.replica_id, p = self.p, v = self.v, "midpoint phase complete");
        true
    }

    fn snapshot(&self) -> AlgorithmSnapshot {
        AlgorithmSnapshot {
            v: self.v,
            p: self.p,
            w: None,
            stage: None,
            converged: Some(self.converged),
            is_done: self.is_done(),
        }
    }

    fn is_done(&self) -> bool {
        self.p as f64 > self.p_end
    }

    fn supports_byzantine(&self) -> bool {
        false
    }

    fn requires_synchronous_update_broadcast(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AlgorithmConfig {
        AlgorithmConfig { servers: 4, replica_id: 0, f: 1, eps: 0.1, k: 100.0 }
    }

    #[test]
    fn rejects_too_small_fleet() {
        let bad = AlgorithmConfig { servers: 2, f: 1, ..config() };
        assert!(matches!(
            Midpoint::new(&bad, None),
            Err(AlgorithmError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn quorum_advances_to_midpoint() {
        let mut a = Midpoint::new(&config(), Some(10.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 20.0)));
        // Third slot completes the N-f = 3 quorum: v = (30 + 10) / 2.
        assert!(a.process_message(&PeerUpdate::value(2, 0, 30.0)));
        let snap = a.snapshot();
        assert_eq!(snap.p, 1);
        assert_eq!(snap.v, 20.0);
        // The fresh buffer holds only our own slot.
        assert_eq!(filled(&a.r), vec![20.0]);
    }

    #[test]
    fn duplicate_sender_does_not_advance() {
        let mut a = Midpoint::new(&config(), Some(10.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 20.0)));
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 90.0)));
        assert_eq!(a.r[1], Some(20.0));
    }

    #[test]
    fn convergence_latches_when_values_are_tight() {
        let mut a = Midpoint::new(&config(), Some(10.0)).unwrap();
        a.process_message(&PeerUpdate::value(1, 0, 10.02));
        a.process_message(&PeerUpdate::value(2, 0, 10.04));
        let snap = a.snapshot();
        assert_eq!(snap.converged, Some(true));
        assert_eq!(snap.v, 10.0);
    }
}
