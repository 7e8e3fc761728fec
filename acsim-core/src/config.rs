//! Simulation parameter management.
//!
//! Parameters are loaded from a single JSON file named on the command line
//! and are immutable for the lifetime of the process. Every field that the
//! consensus algorithms, the replica runtime, or the controller consume is
//! declared here, together with its validation rules.
//!
//! Two keys are optional and default to the emulated network's host
//! numbering: `server_ips` (replica i at 10.0.0.(i+3)) and `controller_ip`
//! (10.0.0.2). A deployment on real addresses overrides both.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use acsim_consensus::{AlgorithmConfig, AlgorithmKind, ReplicaId};

/// Parameters of one simulation campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Consensus variant under test.
    pub algorithm: AlgorithmKind,

    /// Fleet size N.
    pub servers: usize,

    /// Fault budget f: how many replicas the controller makes faulty.
    pub f: usize,

    /// Upper bound of the initial value range [0, K].
    #[serde(rename = "K")]
    pub k: f64,

    /// Agreement tolerance ε.
    pub eps: f64,

    /// Per-tick probability that an unreliable replica turns Byzantine.
    pub byzantine_p: f64,

    /// Per-peer probability that a Byzantine replica drops a broadcast.
    pub byzantine_send_p: f64,

    /// Receiver-side packet drop probability, simulating loss.
    pub drop_rate: f64,

    /// Milliseconds between periodic broadcasts.
    pub broadcast_period: u64,

    /// UDP/TCP port replicas exchange peer traffic on.
    pub server_port: u16,

    /// Port the controller commands replicas on (TCP) and collects state
    /// reports on (UDP).
    pub controller_port: u16,

    /// Number of simulation runs per controller invocation.
    pub n_simulations: u32,

    /// Terminate the fleet once ten consecutive reports exhibit ε-agreement.
    pub terminate_on_p_agreement: bool,

    /// Replica addresses, indexed by replica id. Defaults to the emulated
    /// network's numbering when absent.
    #[serde(default)]
    pub server_ips: Vec<String>,

    /// Controller address. Defaults to the emulated network's numbering
    /// when absent.
    #[serde(default)]
    pub controller_ip: Option<String>,
}

impl SimulationParams {
    /// Load and validate parameters from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read parameter file {}", path.display()))?;
        let mut params: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse parameter file {}", path.display()))?;
        params.fill_defaults();
        params.validate()?;
        Ok(params)
    }

    fn fill_defaults(&mut self) {
        if self.server_ips.is_empty() {
            self.server_ips = (0..self.servers).map(|i| format!("10.0.0.{}", i + 3)).collect();
        }
        if self.controller_ip.is_none() {
            self.controller_ip = Some("10.0.0.2".to_string());
        }
    }

    /// Check every range constraint the external interface promises.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.servers >= 1, "servers must be at least 1");
        ensure!(self.f < self.servers, "f must be smaller than the fleet size");
        ensure!(self.k > 0.0, "K must be positive");
        ensure!(self.eps > 0.0, "eps must be positive");
        for (name, p) in [
            ("byzantine_p", self.byzantine_p),
            ("byzantine_send_p", self.byzantine_send_p),
            ("drop_rate", self.drop_rate),
        ] {
            ensure!((0.0..=1.0).contains(&p), "{name} must lie in [0, 1], got {p}");
        }
        ensure!(self.broadcast_period >= 1, "broadcast_period must be at least 1 ms");
        ensure!(
            self.server_ips.len() == self.servers,
            "server_ips must list one address per replica"
        );
        ensure!(self.n_simulations >= 1, "n_simulations must be at least 1");
        Ok(())
    }

    /// Construction parameters for this replica's state machine.
    pub fn algorithm_config(&self, replica_id: ReplicaId) -> AlgorithmConfig {
        AlgorithmConfig {
            servers: self.servers,
            replica_id,
            f: self.f,
            eps: self.eps,
            k: self.k,
        }
    }

    /// Peer-traffic address of replica `id`.
    pub fn peer_addr(&self, id: ReplicaId) -> Result<SocketAddr> {
        format!("{}:{}", self.server_ips[id], self.server_port)
            .parse()
            .with_context(|| format!("invalid address for replica {id}"))
    }

    /// Address replicas register with and receive commands from.
    pub fn controller_addr(&self) -> Result<SocketAddr> {
        let ip = self.controller_ip.as_deref().unwrap_or("10.0.0.2");
        format!("{}:{}", ip, self.controller_port)
            .parse()
            .context("invalid controller address")
    }

    /// The directory name a run's archive is keyed under.
    pub fn archive_key(&self) -> String {
        format!(
            "{}_nServers_{}_f_{}_eps_{}_byzantineP_{}_bcastPeriod_{}",
            self.algorithm, self.servers, self.f, self.eps, self.byzantine_p, self.broadcast_period
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_json() -> serde_json::Value {
        serde_json::json!({
            "algorithm": "algorithm_2",
            "servers": 5,
            "f": 1,
            "K": 100.0,
            "eps": 0.1,
            "byzantine_p": 0.05,
            "byzantine_send_p": 0.5,
            "drop_rate": 0.0,
            "broadcast_period": 100,
            "server_port": 9100,
            "controller_port": 9200,
            "n_simulations": 1,
            "terminate_on_p_agreement": true
        })
    }

    #[test]
    fn parses_and_fills_default_addresses() {
        let mut params: SimulationParams =
            serde_json::from_value(params_json()).unwrap();
        params.fill_defaults();
        params.validate().unwrap();
        assert_eq!(params.algorithm, AlgorithmKind::ArithmeticMean);
        assert_eq!(params.server_ips[0], "10.0.0.3");
        assert_eq!(params.server_ips[4], "10.0.0.7");
        assert_eq!(params.controller_addr().unwrap().port(), 9200);
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let mut json = params_json();
        json["drop_rate"] = serde_json::json!(1.5);
        let mut params: SimulationParams = serde_json::from_value(json).unwrap();
        params.fill_defaults();
        assert!(params.validate().is_err());
    }

    #[test]
    fn rejects_unknown_algorithm_name() {
        let mut json = params_json();
        json["algorithm"] = serde_json::json!("algorithm_9");
        assert!(serde_json::from_value::<SimulationParams>(json).is_err());
    }

    #[test]
    fn archive_key_embeds_run_parameters() {
        let mut params: SimulationParams =
            serde_json::from_value(params_json()).unwrap();
        params.fill_defaults();
        assert_eq!(
            params.archive_key(),
            "algorithm_2_nServers_5_f_1_eps_0.1_byzantineP_0.05_bcastPeriod_100"
        );
    }
}
