//! Byzantine-tolerant trimmed-midpoint rounds, requiring N > 5f.
//!
//! Incoming reports are classified into the current-phase buffer `R`
//! (`m.p == p`) or the next-phase buffer `S` (`m.p > p`). A phase completes
//! either when the union of both buffers reaches N−f reports, or when the
//! next-phase buffer alone holds 2f+1; either way the proposal moves to the
//! midpoint of the f-trimmed value list.

use rand::Rng;
use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::{filled, trimmed_midpoint};
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
};

#[derive(Debug, Clone)]
pub struct TrimmedMidpoint {
    servers: usize,
    replica_id: ReplicaId,
    f: usize,
    v: Value,
    p: Phase,
    p_end: f64,
    r: Vec<Option<Value>>,
    s: Vec<Option<Value>>,
}

impl TrimmedMidpoint {
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

        // The initial draw is an integer point of [0, K].
        let v = initial.unwrap_or_else(|| {
            rand::thread_rng().gen_range(0..=config.k.floor() as i64) as f64
        });
        let contraction =
            0.5 * ((config.servers - 5 * config.f) as f64 / (2 * (config.servers - config.f)) as f64);
        let p_end = (config.eps / config.k).ln() / contraction.ln();

        let mut algorithm = Self {
            servers: config.servers,
            replica_id: config.replica_id,
            f: config.f,
            v,
            p: 0,
            p_end,
            r: Vec::new(),
            s: Vec::new(),
        };
        algorithm.reset();
        info!(
            replica = algorithm.replica_id,
            p_end, "replica will terminate after p_end phases"
        );
        Ok(algorithm)
    }

    /// The self slot is seeded with a literal 1.0 presence marker that also
    /// participates in the aggregation; the f-trim removes it whenever f > 0.
    fn reset(&mut self) {
        self.r = vec![None; self.servers];
        self.r[self.replica_id] = Some(1.0);
        self.s = vec![None; self.servers];
    }

    fn advance(&mut self, values: &[Value], via: &'static str) -> bool {
        self.v = trimmed_midpoint(values, self.f);
        self.p += 1;
        self.reset();
        debug!(replica = self.replica_id, p = self.p, v = self.v, via, "trimmed phase complete");
        true
    }
}

impl ApproximateConsensus for TrimmedMidpoint {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        if update.p > self.p && self.s[update.id].is_none() {
            self.s[update.id] = Some(update.v);
        } else if update.p == self.p && self.r[update.id].is_none() {
            self.r[update.id] = Some(update.v);
        }

        let r_values = filled(&self.r);
        let s_values = filled(&self.s);

        if r_values.len() + s_values.len() >= self.servers - self.f {
            let union: Vec<Value> = r_values.iter().chain(s_values.iter()).copied().collect();
            return self.advance(&union, "union quorum");
        }

        if s_values.len() >= 2 * self.f + 1 {
            return self.advance(&s_values, "next-phase quorum");
        }

        false
    }

    fn snapshot(&self) -> AlgorithmSnapshot {
        AlgorithmSnapshot {
            v: self.v,
            p: self.p,
            w: None,
            stage: None,
            converged: None,
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
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AlgorithmConfig {
        AlgorithmConfig { servers: 6, replica_id: 0, f: 1, eps: 0.1, k: 100.0 }
    }

    #[test]
    fn rejects_fleet_below_five_f() {
        let bad = AlgorithmConfig { servers: 5, f: 1, ..config() };
        assert!(matches!(
            TrimmedMidpoint::new(&bad, None),
            Err(AlgorithmError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn union_quorum_takes_trimmed_midpoint() {
        // Buffer state: self slot 1.0 plus peers [4, 5, 5, 6]; the message
        // from the last peer completes the union [1, 4, 5, 5, 6, 100].
        // Sorted after trim-1 that is [4, 5, 5, 6], midpoint 5.
        let mut a = TrimmedMidpoint::new(&config(), Some(50.0)).unwrap();
        a.r[1] = Some(4.0);
        a.r[2] = Some(5.0);
        a.r[3] = Some(5.0);
        a.r[4] = Some(6.0);
        assert!(a.process_message(&PeerUpdate::value(5, 0, 100.0)));
        let snap = a.snapshot();
        assert_eq!(snap.v, 5.0);
        assert_eq!(snap.p, 1);
    }

    #[test]
    fn union_quorum_fires_as_soon_as_counts_allow() {
        let mut a = TrimmedMidpoint::new(&config(), Some(50.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 0, 4.0)));
        assert!(!a.process_message(&PeerUpdate::value(2, 0, 5.0)));
        assert!(!a.process_message(&PeerUpdate::value(3, 0, 5.0)));
        // Fifth filled slot (self seed included) completes N-f = 5.
        assert!(a.process_message(&PeerUpdate::value(4, 0, 6.0)));
        assert_eq!(a.snapshot().p, 1);
    }

    #[test]
    fn next_phase_quorum_fires_alone() {
        // 2f+1 = 3 reports from phase 1 complete the phase even though the
        // current-phase buffer is nearly empty.
        let mut a = TrimmedMidpoint::new(&config(), Some(50.0)).unwrap();
        assert!(!a.process_message(&PeerUpdate::value(1, 1, 10.0)));
        assert!(!a.process_message(&PeerUpdate::value(2, 1, 20.0)));
        assert!(a.process_message(&PeerUpdate::value(3, 1, 30.0)));
        let snap = a.snapshot();
        assert_eq!(snap.p, 1);
        assert_eq!(snap.v, 20.0);
    }
}
