//! Fleet scenarios driven entirely in process: the state machines exchange
//! reports through deterministic lossless rounds, with no sockets involved.
//!
//! Each round every replica's published state is snapshotted first, then
//! delivered. The real-valued scenarios deliver a quorum's worth of reports
//! per replica per round (self plus the next N-f-1 replicas around the
//! ring), which keeps every phase fed by values from the same round; the
//! binary scenarios deliver everything to everyone.

use acsim_consensus::{
    Algorithm, AlgorithmConfig, AlgorithmKind, AlgorithmSnapshot, ApproximateConsensus, PeerUpdate,
};

fn config(servers: usize, f: usize, eps: f64, k: f64) -> AlgorithmConfig {
    AlgorithmConfig { servers, replica_id: 0, f, eps, k }
}

fn fleet(kind: AlgorithmKind, base: AlgorithmConfig, initial: &[f64]) -> Vec<Algorithm> {
    initial
        .iter()
        .enumerate()
        .map(|(id, v)| {
            let config = AlgorithmConfig { replica_id: id, ..base };
            Algorithm::with_initial_value(kind, &config, *v).expect("valid fleet shape")
        })
        .collect()
}

fn update_from(id: usize, snapshot: &AlgorithmSnapshot) -> PeerUpdate {
    PeerUpdate {
        id,
        p: snapshot.p,
        v: snapshot.v,
        w: snapshot.w,
        stage: snapshot.stage,
        is_done: snapshot.is_done,
    }
}

/// One lossless round where each replica hears exactly a quorum: itself plus
/// the `peers_heard` replicas after it on the ring.
fn quorum_round(replicas: &mut [Algorithm], peers_heard: usize) {
    let snapshots: Vec<AlgorithmSnapshot> = replicas.iter().map(|r| r.snapshot()).collect();
    let n = replicas.len();
    for (id, replica) in replicas.iter_mut().enumerate() {
        for step in 1..=peers_heard {
            let from = (id + step) % n;
            replica.process_message(&update_from(from, &snapshots[from]));
        }
    }
}

/// One lossless round where everyone hears everyone.
fn full_round(replicas: &mut [Algorithm]) {
    let snapshots: Vec<AlgorithmSnapshot> = replicas.iter().map(|r| r.snapshot()).collect();
    let n = replicas.len();
    for (id, replica) in replicas.iter_mut().enumerate() {
        for from in 0..n {
            if from != id {
                replica.process_message(&update_from(from, &snapshots[from]));
            }
        }
    }
}

fn values(replicas: &[Algorithm]) -> Vec<f64> {
    replicas.iter().map(|r| r.snapshot().v).collect()
}

fn spread(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}

/// Midpoint averaging, N=4, f=1, K=100, ε=0.1, initial values spread over
/// the range: the fleet terminates and ends within ε of each other, near
/// the center of the initial values.
#[test]
fn midpoint_fleet_converges_and_terminates() {
    let mut replicas = fleet(
        AlgorithmKind::Midpoint,
        config(4, 1, 0.1, 100.0),
        &[10.0, 20.0, 30.0, 40.0],
    );

    for _ in 0..15 {
        quorum_round(&mut replicas, 2);
    }

    assert!(replicas.iter().all(|r| r.is_done()), "fleet did not terminate");
    let finals = values(&replicas);
    assert!(spread(&finals) <= 0.1, "final spread too wide: {finals:?}");
    for v in &finals {
        assert!((10.0..=40.0).contains(v), "value escaped the initial hull: {v}");
        assert!((v - 25.0).abs() <= 1.0, "value far from the convergence point: {v}");
    }
}

/// The mean-based variant under the same fleet shape converges as well.
#[test]
fn mean_fleet_converges_and_terminates() {
    let mut replicas = fleet(
        AlgorithmKind::ArithmeticMean,
        config(4, 1, 0.1, 100.0),
        &[10.0, 20.0, 30.0, 40.0],
    );

    for _ in 0..15 {
        quorum_round(&mut replicas, 2);
    }

    assert!(replicas.iter().all(|r| r.is_done()), "fleet did not terminate");
    let finals = values(&replicas);
    assert!(spread(&finals) <= 0.1, "final spread too wide: {finals:?}");
    for v in &finals {
        assert!((10.0..=40.0).contains(v), "value escaped the initial hull: {v}");
    }
}

/// Binary rounds with every replica starting at 1: two rounds of full
/// exchange decide 1 everywhere.
#[test]
fn binary_majority_fleet_decides_unanimous_input() {
    let mut replicas = fleet(
        AlgorithmKind::BinaryMajority,
        config(5, 1, 0.1, 1.0),
        &[1.0; 5],
    );

    for _ in 0..20 {
        if replicas.iter().all(|r| r.is_done()) {
            break;
        }
        full_round(&mut replicas);
    }

    for replica in &replicas {
        let snapshot = replica.snapshot();
        assert!(snapshot.is_done, "replica did not decide");
        assert_eq!(snapshot.v, 1.0);
    }
}

/// Ben-Or with every replica starting at 1: stage one fixes unanimous
/// support, stage two decides 1 everywhere.
#[test]
fn ben_or_fleet_decides_unanimous_input() {
    let mut replicas = fleet(AlgorithmKind::BenOr, config(5, 1, 0.1, 1.0), &[1.0; 5]);

    for _ in 0..20 {
        if replicas.iter().all(|r| r.is_done()) {
            break;
        }
        full_round(&mut replicas);
    }

    for replica in &replicas {
        let snapshot = replica.snapshot();
        assert!(snapshot.is_done, "replica did not decide");
        assert_eq!(snapshot.v, 1.0);
    }
}

/// A retired peer's latched value keeps feeding quorums: after one replica
/// announces completion and goes silent, the remaining five still close
/// every phase (self + four live peers + the latched column) and terminate.
#[test]
fn retired_peer_keeps_feeding_the_fleet() {
    let initial = [40.0, 42.0, 44.0, 46.0, 48.0, 50.0];
    let mut replicas = fleet(AlgorithmKind::Jacm86, config(6, 1, 0.5, 100.0), &initial);

    full_round(&mut replicas);

    // Replica 5 bows out: its final report reaches everyone once, then it
    // never speaks again.
    let farewell = PeerUpdate { is_done: true, ..update_from(5, &replicas[5].snapshot()) };
    let (live, _) = replicas.split_at_mut(5);
    for replica in live.iter_mut() {
        replica.process_message(&farewell);
    }

    for _ in 0..20 {
        if live.iter().all(|r| r.is_done()) {
            break;
        }
        full_round(live);
    }

    assert!(live.iter().all(|r| r.is_done()), "live fleet did not terminate");
    let finals = values(live);
    assert!(spread(&finals) <= 0.5, "final spread too wide: {finals:?}");
}
