//! Single-call binary rounds in the style of Ben-Or, crash model.
//!
//! Both stages of a round run inside one receive loop: a quorum of values
//! yields the stage-two support bit `w` (or the no-majority sentinel), and a
//! quorum of support bits either decides or re-randomizes before the next
//! round. A report from a later phase is adopted as a jump update.

use tracing::{debug, info};

use crate::error::AlgorithmError;
use crate::stats::{coin_flip, filled, majority};
use crate::types::{
    AlgorithmConfig, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate, Phase, ReplicaId, Value,
    NO_MAJORITY,
};

#[derive(Debug, Clone)]
pub struct BinaryMajority {
    servers: usize,
    replica_id: ReplicaId,
    f: usize,
    v: Value,
    w: Option<Value>,
    p: Phase,
    done: bool,
    r: Vec<Option<Value>>,
    s: Vec<Option<Value>>,
}

impl BinaryMajority {
    pub(crate) fn new(
        config: &AlgorithmConfig,
        initial: Option<Value>,
    ) -> Result<Self, AlgorithmError> {
        let v = initial.unwrap_or_else(|| coin_flip(&mut rand::thread_rng()));
        let mut algorithm = Self {
            servers: config.servers,
            replica_id: config.replica_id,
            f: config.f,
            v,
            w: None,
            p: 0,
            done: false,
            r: Vec::new(),
            s: Vec::new(),
        };
        algorithm.reset();
        Ok(algorithm)
    }

    fn reset(&mut self) {
        self.w = None;
        self.r = vec![None; self.servers];
        self.r[self.replica_id] = Some(1.0);
        self.s = vec![None; self.servers];
    }
}

impl ApproximateConsensus for BinaryMajority {
    fn process_message(&mut self, update: &PeerUpdate) -> bool {
        if update.p > self.p {
            self.p = update.p;
            self.v = update.v;
            self.reset();
            info!(
                replica = self.replica_id,
                from = update.id,
                p = self.p,
                "accepted jump update"
            );
            return true;
        }

        if update.p == self.p {
            self.r[update.id] = Some(update.v);
            if let Some(w) = update.w {
                self.s[update.id] = Some(w);
            }
        }

        // Stage one: a value quorum fixes our support bit.
        if filled(&self.r).len() >= self.servers - self.f
            && matches!(self.w, None | Some(NO_MAJORITY))
        {
            let w = majority(&self.r).unwrap_or(NO_MAJORITY);
            self.w = Some(w);
            self.s[self.replica_id] = Some(w);
        }

        // Stage two: a support quorum decides or re-randomizes.
        if filled(&self.s).len() >= self.servers - self.f {
            let supported: Vec<Value> =
                filled(&self.s).into_iter().filter(|w| *w != NO_MAJORITY).collect();
            match supported.first() {
                Some(&value) => {
                    self.v = value;
                    let support =
                        self.s.iter().flatten().filter(|w| **w == self.v).count();
                    if support > self.f + 1 {
                        self.done = true;
                    }
                }
                None => self.v = coin_flip(&mut rand::thread_rng()),
            }
            self.p += 1;
            self.reset();
            debug!(replica = self.replica_id, p = self.p, v = self.v, "binary round complete");
            return true;
        }

        false
    }

    fn snapshot(&self) -> AlgorithmSnapshot {
        AlgorithmSnapshot {
            v: self.v,
            p: self.p,
            w: self.w,
            stage: None,
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
        false
    }
}
