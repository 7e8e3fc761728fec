//! The state-report collector and the ε-agreement detector.
//!
//! Every replica report lands here: it is appended to that replica's
//! history (order of arrival, never rewritten), feeds the ready barrier and
//! the done set, and is run through the agreement detector. When the
//! detector has seen ten consecutive qualifying reports and the run is
//! configured to terminate on agreement, the whole fleet is marked done.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use acsim_consensus::{Phase, ReplicaId};
use acsim_core::SimulationParams;
use acsim_wire::{decode_frame, StateReport, FRAME_LEN};

use crate::board::FlagBoard;

/// Reports that must qualify back-to-back before the controller terminates
/// the fleet on agreement.
const CONSECUTIVE_QUALIFYING_REPORTS: u32 = 10;

/// How long one receive waits before re-checking for termination.
const COLLECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// A state report together with its arrival time at the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedReport {
    pub report: StateReport,
    pub received_at: DateTime<Utc>,
}

/// Per-replica, append-only report histories.
pub type ReportHistories = Arc<DashMap<ReplicaId, Vec<ReceivedReport>>>;

/// Detects stable ε-agreement across the latest reports of the non-faulty
/// fleet.
///
/// Agreement is recorded when at least N−f non-faulty replicas' latest
/// reports sit at the observed phase with a value spread of at most ε, and
/// cleared as soon as the latest values — at any phase — spread wider than
/// ε again.
pub struct AgreementDetector {
    servers: usize,
    f: usize,
    eps: f64,
    faulty: Vec<bool>,
    latest: Vec<Option<StateReport>>,
    p_agreement: Option<(Phase, i64)>,
    consecutive: u32,
}

impl AgreementDetector {
    pub fn new(servers: usize, f: usize, eps: f64, faulty_servers: &[ReplicaId]) -> Self {
        let mut faulty = vec![false; servers];
        for &id in faulty_servers {
            faulty[id] = true;
        }
        Self {
            servers,
            f,
            eps,
            faulty,
            latest: vec![None; servers],
            p_agreement: None,
            consecutive: 0,
        }
    }

    /// Fold one report in. Returns `true` once the consecutive-agreement
    /// threshold is reached.
    pub fn observe(&mut self, report: &StateReport) -> bool {
        self.latest[report.id] = Some(report.clone());

        let at_phase: Vec<&StateReport> = self
            .non_faulty_latest()
            .filter(|r| r.p == report.p)
            .collect();
        if at_phase.len() >= self.servers - self.f {
            let values: Vec<f64> = at_phase.iter().map(|r| r.v).collect();
            if spread(&values) <= self.eps {
                let time = at_phase.iter().map(|r| r.time_generated).max().unwrap_or(0);
                if self.p_agreement.is_none() {
                    info!(p = report.p, "fleet reached ε-agreement");
                }
                self.p_agreement = Some((report.p, time));
                self.consecutive += 1;
            }
        }

        // Divergence check over the latest values regardless of phase: a
        // single replica running ahead with a wide value voids the record.
        if self.p_agreement.is_some() {
            let values: Vec<f64> = self.non_faulty_latest().map(|r| r.v).collect();
            if spread(&values) > self.eps {
                info!("ε-agreement diverged, clearing");
                self.p_agreement = None;
                self.consecutive = 0;
            }
        }

        self.consecutive >= CONSECUTIVE_QUALIFYING_REPORTS
    }

    /// The current agreement record: the agreed phase and the latest
    /// generation time among the agreeing reports.
    pub fn agreement(&self) -> Option<(Phase, i64)> {
        self.p_agreement
    }

    fn non_faulty_latest(&self) -> impl Iterator<Item = &StateReport> {
        self.latest
            .iter()
            .enumerate()
            .filter(|(id, _)| !self.faulty[*id])
            .filter_map(|(_, report)| report.as_ref())
    }
}

fn spread(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}

/// Receive state reports until the whole fleet is done.
pub async fn collect_reports(
    socket: UdpSocket,
    params: Arc<SimulationParams>,
    mut detector: AgreementDetector,
    histories: ReportHistories,
    ready: FlagBoard,
    done: FlagBoard,
) {
    let mut buf = [0u8; FRAME_LEN];
    loop {
        if done.all_set() {
            break;
        }

        let len = match timeout(COLLECT_TIMEOUT, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok((len, _))) => len,
            Ok(Err(e)) => {
                warn!(error = %e, "report receive failed");
                continue;
            }
        };

        let report: StateReport = match decode_frame(&buf[..len]) {
            Ok(report) => report,
            Err(_) => continue,
        };
        if report.id >= params.servers {
            warn!(id = report.id, "report from unknown replica");
            continue;
        }
        debug!(replica = report.id, p = report.p, v = report.v, "state report");

        histories
            .entry(report.id)
            .or_default()
            .push(ReceivedReport { report: report.clone(), received_at: Utc::now() });

        if report.ready {
            ready.set(report.id);
        }
        if report.is_done {
            done.set(report.id);
        }

        if detector.observe(&report) && params.terminate_on_p_agreement {
            info!("stable ε-agreement held, terminating the fleet");
            done.set_all();
        }
    }
    info!("report collector stopping");
}
