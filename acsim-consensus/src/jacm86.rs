//! Trimmed-midpoint consensus over a per-phase receive matrix, with peer
//! retirement, in the style of the JACM 1986 approximate-agreement protocol.
//! Requires N > 5f.
//!
//! The receive buffer is a fixed `(⌈p_end⌉ + 2) × N` table indexed by phase
//! and sender, so reports for any phase land in their own row. A peer that
//! announces completion is retired: its final value is latched and written
//! into its column across every row, which keeps slow replicas supplied with
//! a quorum after fast ones stop advancing.

use rand::Rng;
use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::{filled, trim};
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
};

#[derive(Debug, Clone)]
pub struct Jacm86 {
    servers: usize,
    replica_id: ReplicaId,
    f: usize,
    eps: f64,
    v: Value,
    p: Phase,
    p_end: f64,
    converged: bool,
    done_servers: Vec<bool>,
    done_values: Vec<Option<Value>>,
    r: Vec<Vec<Option<Value>>>,
}

impl Jacm86 {
    pub(crate) fn new(
        config: &AlgorithmConfig,
        initial: Option<Value>,
    ) -> Result<Self, AlgorithmError> {
        if config.servers <= 5 * config.f {
            return Err(AlgorithmError::InvalidConfiguration {
                servers: config.servers,
                f: config.f,
                requirement: "N > 5f",
            });
        }

        let v = initial.unwrap_or_else(|| rand::thread_rng().gen_range(0.0..=config.k));
        let p_end = (config.eps / config.k).ln() / 0.5f64.ln();
        let rows = p_end.ceil() as usize + 2;

        let mut algorithm = Self {
            servers: config.servers,
            replica_id: config.replica_id,
            f: config.f,
            eps: config.eps,
            v,
            p: 0,
            p_end,
            converged: false,
            done_servers: vec![false; config.servers],
            done_values: vec![None; config.servers],
            r: vec![vec![None; config.servers]; rows],
        };
        algorithm.r[0][algorithm.replica_id] = Some(v);
        info!(
            replica = algorithm.replica_id,
            p_end, "replica will terminate after p_end phases"
        );
        Ok(algorithm)
    }

    fn retire(&mut self, id: ReplicaId, value: Value) {
        info!(replica = self.replica_id, peer = id, value, "peer retired");
        self.done_servers[id] = true;
        self.done_values[id] = Some(value);
        for row in &mut self.r {
            row[id] = Some(value);
        }
    }
}

impl ApproximateConsensus for Jacm86 {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        if update.is_done && !self.done_servers[update.id] {
            self.retire(update.id, update.v);
        }

        // Reports for phases beyond the table are dropped; the sender is
        // already past our termination threshold.
        if let Some(row) = self.r.get_mut(update.p as usize) {
            if row[update.id].is_none() {
                row[update.id] = Some(update.v);
            }
        }

        let current = &self.r[self.p as usize];
        let values = filled(current);
        if values.len() < self.servers - self.f || self.p as f64 > self.p_end {
            return false;
        }

        let trimmed = trim(&values, self.f);
        if trimmed.iter().any(|x| (self.v - x).abs() > self.eps / 2.0) {
            self.v = (trimmed[0] + trimmed[trimmed.len() - 1]) / 2.0;
        } else {
            self.converged = true;
        }
        self.p += 1;
        self.r[self.p as usize][self.replica_id] = Some(self.v);
        debug!(replica = self.replica_id, p = self.p, v = self.v, "trimmed phase complete");
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
        true
    }

    fn requires_synchronous_update_broadcast(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AlgorithmConfig {
        AlgorithmConfig { servers: 6, replica_id: 0, f: 1, eps: 0.1, k: 100.0 }
    }

    #[test]
    fn retirement_latches_final_value_into_every_phase() {
        let mut a = Jacm86::new(&config(), Some(50.0)).unwrap();
        let update = PeerUpdate { is_done: true, ..PeerUpdate::value(2, 3, 7.0) };
        a.process_message(&update);

        assert!(a.done_servers[2]);
        assert_eq!(a.done_values[2], Some(7.0));
        for row in &a.r {
            assert_eq!(row[2], Some(7.0));
        }
    }

    #[test]
    fn quorum_on_current_row_advances() {
        let mut a = Jacm86::new(&config(), Some(50.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 10.0)));
        assert!(!a.process_message(&PeerUpdate::value(2, 0, 20.0)));
        assert!(!a.process_message(&PeerUpdate::value(3, 0, 30.0)));
        // Fifth filled slot reaches N-f; trim-1 of [10, 20, 30, 40, 50]
        // leaves [20, 30, 40], midpoint 30.
        assert!(a.process_message(&PeerUpdate::value(4, 0, 40.0)));
        let snap = a.snapshot();
        assert_eq!(snap.p, 1);
        assert_eq!(snap.v, 30.0);
        // Own slot of the new row is pre-populated.
        assert_eq!(a.r[1][0], Some(30.0));
    }

    #[test]
    fn reports_for_phases_beyond_the_table_are_ignored() {
        let mut a = Jacm86::new(&config(), Some(50.0)).unwrap();
        let far = PeerUpdate::value(1, 1_000, 10.0);
        assert!(!a.process_message(&far));
        assert_eq!(a.snapshot().p, 0);
    }

    #[test]
    fn convergence_latches_when_trimmed_values_are_tight() {
        let mut a = Jacm86::new(&config(), Some(50.0)).unwrap();
        for id in 1..=4 {
            a.process_message(&PeerUpdate::value(id, 0, 50.0 + id as f64 * 0.005));
        }
        let snap = a.snapshot();
        assert_eq!(snap.converged, Some(true));
        assert_eq!(snap.v, 50.0);
        assert_eq!(snap.p, 1);
    }
}
