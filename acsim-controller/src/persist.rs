//! Result persistence.
//!
//! One binary archive per simulation run, under a directory keyed by the
//! run's parameters, named by a fresh UUID so repeated runs never collide.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use acsim_consensus::ReplicaId;
use acsim_core::SimulationParams;

use crate::collector::ReceivedReport;

/// Everything one simulation run leaves behind.
#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationRecord {
    /// Per-replica report histories, in arrival order.
    pub server_states: Vec<Vec<ReceivedReport>>,
    pub params: SimulationParams,
    /// When the first start command left.
    pub first_start_time: DateTime<Utc>,
    /// When the last start command left.
    pub all_start_time: DateTime<Utc>,
    pub faulty_servers: Vec<ReplicaId>,
}

/// Serialize the record under `data/<parameter key>/<uuid>.bin` and return
/// the path written.
pub async fn write_archive(record: &SimulationRecord) -> Result<PathBuf> {
    let dir = archive_dir(&record.params);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create archive directory {}", dir.display()))?;

    let path = dir.join(format!("{}.bin", Uuid::new_v4().simple()));
    let bytes = bincode::serialize(record).context("failed to serialize simulation record")?;
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write archive {}", path.display()))?;
    Ok(path)
}

fn archive_dir(params: &SimulationParams) -> PathBuf {
    Path::new("data").join(params.archive_key())
}
