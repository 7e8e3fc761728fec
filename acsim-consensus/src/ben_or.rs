//! The two-stage randomized binary protocol of Ben-Or, crash model.
//!
//! Each phase runs two explicit stages. Stage one collects a quorum of
//! values and fixes the support bit `w` (majority or the no-majority
//! sentinel); stage two collects a quorum of support bits and either decides
//! on a value with more than f supporters or re-randomizes. Reports that
//! arrive for a later phase are buffered per phase and replayed when the
//! replica gets there, so nothing is lost to the asynchrony between peers.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::{coin_flip, filled, majority};
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
    NO_MAJORITY,
};

#[derive(Debug, Clone)]
pub struct BenOr {
    servers: usize,
    replica_id: ReplicaId,
    f: usize,
    v: Value,
    w: Option<Value>,
    p: Phase,
    stage: u8,
    done: bool,
    r: Vec<Option<Value>>,
    s: Vec<Option<Value>>,
    /// Reports received for phases we have not reached yet, replayed on
    /// entry into each phase.
    futures: HashMap<Phase, Vec<PeerUpdate>>,
}

impl BenOr {
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

        let v = initial.unwrap_or_else(|| coin_flip(&mut rand::thread_rng()));
        let mut algorithm = Self {
            servers: config.servers,
            replica_id: config.replica_id,
            f: config.f,
            v,
            w: None,
            p: 0,
            stage: 1,
            done: false,
            r: Vec::new(),
            s: Vec::new(),
            futures: HashMap::new(),
        };
        algorithm.reset();
        Ok(algorithm)
    }

    fn reset(&mut self) {
        self.w = None;
        self.r = vec![None; self.servers];
        self.r[self.replica_id] = Some(self.v);
        self.s = vec![None; self.servers];
    }

    fn apply_buffered(&mut self, update: &PeerUpdate) {
        self.r[update.id] = Some(update.v);
        if let Some(w) = update.w {
            self.s[update.id] = Some(w);
        }
    }
}

impl ApproximateConsensus for BenOr {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        // Replay anything buffered for the phase we are now in.
        if let Some(pending) = self.futures.remove(&self.p) {
            for buffered in &pending {
                debug!(
                    replica = self.replica_id,
                    from = buffered.id,
                    p = buffered.p,
                    "replaying buffered report"
                );
                self.apply_buffered(buffered);
            }
        }

        if update.p > self.p {
            self.futures.entry(update.p).or_default().push(update.clone());
        } else if update.p == self.p && update.stage == Some(1) {
            self.r[update.id] = Some(update.v);
        } else if update.p == self.p && update.stage == Some(2) {
            if let Some(w) = update.w {
                self.s[update.id] = Some(w);
            }
        }

        if self.stage == 1 && filled(&self.r).len() >= self.servers - self.f {
            let w = majority(&self.r).unwrap_or(NO_MAJORITY);
            self.w = Some(w);
            self.s[self.replica_id] = Some(w);
            self.stage = 2;
            info!(replica = self.replica_id, p = self.p, w, "moving to second stage");
            return true;
        }

        if self.stage == 2 && filled(&self.s).len() >= self.servers - self.f {
            let supported: Vec<Value> =
                filled(&self.s).into_iter().filter(|w| *w != NO_MAJORITY).collect();
            match supported.first() {
                Some(&value) => {
                    self.v = value;
                    let support =
                        self.s.iter().flatten().filter(|w| **w == self.v).count();
                    if support > self.f {
                        self.done = true;
                    }
                }
                None => self.v = coin_flip(&mut rand::thread_rng()),
            }
            self.stage = 1;
            self.p += 1;
            self.reset();
            info!(replica = self.replica_id, p = self.p, v = self.v, "round complete");
            return true;
        }

        false
    }

    fn snapshot(&self) -> AlgorithmSnapshot {
        AlgorithmSnapshot {
            v: self.v,
            p: self.p,
            w: self.w,
            stage: Some(self.stage),
            converged: None,
            is_done: self.done,
        }
    }

    fn is_done(&self) -> bool {
        self.done
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
        AlgorithmConfig { servers: 5, replica_id: 0, f: 1, eps: 0.1, k: 1.0 }
    }

    fn stage1(id: ReplicaId, p: Phase, v: Value) -> PeerUpdate {
        PeerUpdate { id, p, v, w: None, stage: Some(1), is_done: false }
    }

    fn stage2(id: ReplicaId, p: Phase, v: Value, w: Value) -> PeerUpdate {
        PeerUpdate { id, p, v, w: Some(w), stage: Some(2), is_done: false }
    }

    #[test]
    fn stage_one_quorum_publishes_support() {
        let mut a = BenOr::new(&config(), Some(1.0)).unwrap();
        assert!(!a.process_message(&stage1(1, 0, 1.0)));
        assert!(!a.process_message(&stage1(2, 0, 1.0)));
        // Fourth filled slot (self included) completes the quorum and the
        // stage transition reports an advancement.
        assert!(a.process_message(&stage1(3, 0, 1.0)));
        let snap = a.snapshot();
        assert_eq!(snap.stage, Some(2));
        assert_eq!(snap.w, Some(1.0));
        assert_eq!(snap.p, 0);
    }

    #[test]
    fn stage_two_decides_with_enough_support() {
        let mut a = BenOr::new(&config(), Some(1.0)).unwrap();
        for id in 1..=3 {
            a.process_message(&stage1(id, 0, 1.0));
        }
        assert!(!a.process_message(&stage2(1, 0, 1.0, 1.0)));
        assert!(!a.process_message(&stage2(2, 0, 1.0, 1.0)));
        assert!(a.process_message(&stage2(3, 0, 1.0, 1.0)));
        let snap = a.snapshot();
        assert_eq!(snap.v, 1.0);
        assert!(snap.is_done);
        assert_eq!(snap.p, 1);
        assert_eq!(snap.stage, Some(1));
    }

    #[test]
    fn future_reports_replay_on_phase_entry() {
        let mut a = BenOr::new(&config(), Some(1.0)).unwrap();
        // Phase-1 reports arrive while we are still in phase 0.
        assert!(!a.process_message(&stage1(4, 1, 0.0)));
        assert!(a.futures.contains_key(&1));

        // Complete phase 0 with unanimous ones.
        for id in 1..=3 {
            a.process_message(&stage1(id, 0, 1.0));
        }
        for id in 1..=3 {
            a.process_message(&stage2(id, 0, 1.0, 1.0));
        }
        assert_eq!(a.snapshot().p, 1);

        // The buffered phase-1 report lands in the fresh buffer on the next
        // call.
        a.process_message(&stage1(1, 1, 1.0));
        assert_eq!(a.r[4], Some(0.0));
        assert!(!a.futures.contains_key(&1));
    }
}
