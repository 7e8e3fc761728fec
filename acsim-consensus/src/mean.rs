//! Arithmetic-mean rounds with jump adoption.
//!
//! Values are collected per phase; a quorum of N−f replaces the proposal
//! with the arithmetic mean of the collected values. A report from a replica
//! in a strictly later phase is adopted wholesale (value and phase), with
//! the receive buffer reset. Crash model only; requires N > 2f.

use rand::Rng;
use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::filled;
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
};

#[derive(Debug, Clone)]
pub struct ArithmeticMean {
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

impl ArithmeticMean {
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

impl ApproximateConsensus for ArithmeticMean {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        if update.p > self.p {
            // Jump update: adopt the sender's value and phase outright.
            self.v = update.v;
            self.p = update.p;
            self.reset();
            info!(
                replica = self.replica_id,
                from = update.id,
                p = self.p,
                "accepting jump update"
            );
            return true;
        }

        if update.p != self.p || self.r[update.id].is_some() {
            return false;
        }
        self.r[update.id] = Some(update.v);

        let values = filled(&self.r);
        if values.len() < self.servers - self.f {
            return false;
        }

        if values.iter().any(|x| *x > self.eps / 2.0) {
            self.v = values.iter().sum::<f64>() / values.len() as f64;
        } else {
            self.converged = true;
        }
        self.p += 1;
        self.reset();
        debug!(replica = self.replica_id, p = self.p, v = self.v, "mean phase complete");
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
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AlgorithmConfig {
        AlgorithmConfig { servers: 5, replica_id: 0, f: 1, eps: 0.1, k: 100.0 }
    }

    #[test]
    fn jump_update_adopts_value_and_phase() {
        let mut a = ArithmeticMean::new(&config(), Some(50.0)).unwrap();
        assert!(a.process_message(&PeerUpdate::value(3, 7, 12.0)));
        let snap = a.snapshot();
        assert_eq!(snap.p, 7);
        assert_eq!(snap.v, 12.0);
        // Only our own slot survives the jump.
        assert_eq!(filled(&a.r), vec![12.0]);
    }

    #[test]
    fn quorum_advances_to_arithmetic_mean() {
        let mut a = ArithmeticMean::new(&config(), Some(10.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 20.0)));
        assert!(!a.process_message(&PeerUpdate::value(2, 0, 30.0)));
        assert!(a.process_message(&PeerUpdate::value(3, 0, 40.0)));
        let snap = a.snapshot();
        assert_eq!(snap.p, 1);
        assert_eq!(snap.v, 25.0);
    }

    #[test]
    fn stale_phase_reports_are_ignored() {
        let mut a = ArithmeticMean::new(&config(), Some(50.0)).unwrap();
        a.process_message(&PeerUpdate::value(3, 7, 12.0));
        assert!(!a.process_message(&PeerUpdate::value(1, 2, 80.0)));
        assert_eq!(a.snapshot().p, 7);
    }
}
