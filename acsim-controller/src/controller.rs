//! The simulation orchestrator.
//!
//! Lifecycle per run: draw the faulty set, accept N registrations, wait for
//! every replica's ready report, release the fleet, drive faults until the
//! done set fills, crash whatever is still connected, and archive the run.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use rand::seq::index;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use acsim_consensus::ReplicaId;
use acsim_core::SimulationParams;
use acsim_wire::{decode_frame, ControllerCommand, RegisterHello, FRAME_LEN};

use crate::board::FlagBoard;
use crate::collector::{self, AgreementDetector, ReportHistories};
use crate::drivers::{self, CommandConnection};
use crate::persist::{self, SimulationRecord};

pub struct Controller {
    params: Arc<SimulationParams>,
}

impl Controller {
    pub fn new(params: Arc<SimulationParams>) -> Self {
        Self { params }
    }

    /// Run the configured number of simulations back to back. The external
    /// harness restarts the replica fleet between runs; each run re-opens
    /// the rendezvous.
    pub async fn run(&self) -> Result<()> {
        for run in 0..self.params.n_simulations {
            info!(run, "starting simulation");
            self.run_simulation().await.with_context(|| format!("simulation {run} failed"))?;
            info!(run, "simulation finished");
        }
        Ok(())
    }

    async fn run_simulation(&self) -> Result<()> {
        let params = &self.params;
        let servers = params.servers;

        // All f faulty replicas are Byzantine when the algorithm tolerates
        // it, permanently down otherwise.
        let byzantine_model = params.algorithm.supports_byzantine(servers, params.f);
        let mut faulty_servers =
            index::sample(&mut rand::thread_rng(), servers, params.f).into_vec();
        faulty_servers.sort_unstable();
        info!(?faulty_servers, byzantine_model, "picked faulty set");

        let ready = FlagBoard::new(servers);
        let done = FlagBoard::new(servers);
        let histories: ReportHistories = Arc::new(DashMap::new());
        let detector = AgreementDetector::new(servers, params.f, params.eps, &faulty_servers);

        // The report socket must exist before any replica can register:
        // a replica sends its one-shot ready report the moment its runtime
        // is up, which can be before the last registration is accepted.
        let report_socket = UdpSocket::bind(("0.0.0.0", params.controller_port))
            .await
            .context("failed to bind report socket")?;
        let collector = tokio::spawn(collector::collect_reports(
            report_socket,
            params.clone(),
            detector,
            histories.clone(),
            ready.clone(),
            done.clone(),
        ));

        let connections = self.accept_registrations(servers).await?;

        info!("waiting for the fleet to report ready");
        ready.wait_all().await;

        // Release the fleet.
        let first_start_time = Utc::now();
        for (id, connection) in connections.iter().enumerate() {
            if let Err(e) = drivers::send_command(connection, &ControllerCommand::start()).await {
                warn!(replica = id, error = %e, "start command failed");
                done.set(id);
            }
        }
        let all_start_time = Utc::now();
        info!("fleet started");

        let mut driver_tasks = Vec::with_capacity(servers);
        for (id, connection) in connections.iter().enumerate() {
            let connection = connection.clone();
            let done = done.clone();
            if faulty_servers.contains(&id) && !byzantine_model {
                driver_tasks.push(tokio::spawn(drivers::permanent_down_driver(
                    id, connection, done,
                )));
            } else {
                let eligible = faulty_servers.contains(&id) && byzantine_model;
                driver_tasks.push(tokio::spawn(drivers::unreliable_driver(
                    id,
                    connection,
                    eligible,
                    params.clone(),
                    done,
                )));
            }
        }

        done.wait_all().await;
        info!("every replica is done, crashing the fleet");

        // Force anything still running to exit; errors just mean the
        // replica already left.
        for connection in &connections {
            let _ = drivers::send_command(connection, &ControllerCommand::crash()).await;
        }

        for task in driver_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "fault driver panicked");
            }
        }
        if let Err(e) = collector.await {
            error!(error = %e, "collector panicked");
        }

        let server_states = (0..servers)
            .map(|id| histories.remove(&id).map(|(_, reports)| reports).unwrap_or_default())
            .collect();
        let record = SimulationRecord {
            server_states,
            params: (**params).clone(),
            first_start_time,
            all_start_time,
            faulty_servers,
        };
        let path = persist::write_archive(&record).await?;
        info!(path = %path.display(), "simulation archived");
        Ok(())
    }

    /// Accept exactly N registrations, mapping each connection to its
    /// replica through the hello frame.
    async fn accept_registrations(&self, servers: usize) -> Result<Vec<CommandConnection>> {
        let listener = TcpListener::bind(("0.0.0.0", self.params.controller_port))
            .await
            .context("failed to bind registration listener")?;
        info!(port = self.params.controller_port, servers, "waiting for registrations");

        let mut connections: Vec<Option<CommandConnection>> =
            (0..servers).map(|_| None).collect();
        for _ in 0..servers {
            let (mut stream, addr) = listener.accept().await?;
            let mut frame = [0u8; FRAME_LEN];
            stream.read_exact(&mut frame).await.context("registration hello truncated")?;
            let hello: RegisterHello =
                decode_frame(&frame).context("malformed registration hello")?;
            ensure!(hello.id < servers, "registration from unknown replica {}", hello.id);
            ensure!(
                connections[hello.id].is_none(),
                "replica {} registered twice",
                hello.id
            );
            info!(replica = hello.id, %addr, "replica registered");
            connections[hello.id] = Some(Arc::new(Mutex::new(stream)));
        }

        let connections: Vec<CommandConnection> = connections.into_iter().flatten().collect();
        ensure!(connections.len() == servers, "registration rendezvous ended incomplete");
        Ok(connections)
    }
}
