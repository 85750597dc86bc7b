use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths;
use crate::probe::{self, Reachability};
use crate::state::{Manager, ProcessRecord};

/// Point-in-time view of the backend daemon, derived from the record plus a
/// fresh OS liveness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub manager: Manager,
    pub running: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Disposable snapshot written by every lifecycle command. Always fully
/// regenerated, never merged; observability only, never a source of truth
/// for control decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub checked_at: DateTime<Utc>,
    /// Which command produced this snapshot ("start", "stop", "status").
    pub event: String,
    pub daemon: DaemonState,
    pub backend: Reachability,
    /// Present on "stop" snapshots: whether escalation to the forceful
    /// signal was required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced: Option<bool>,
}

impl DaemonState {
    pub fn derive(record: &ProcessRecord) -> Self {
        let running = record.pid.map(probe::process_alive).unwrap_or(false);
        DaemonState {
            manager: record.manager,
            running,
            pid: if running { record.pid } else { None },
            started_at: record.started_at,
            stopped_at: record.stopped_at,
            working_dir: record.working_dir.clone(),
        }
    }
}

/// Probe the backend, combine with daemon liveness, and overwrite
/// health.json. Returns the snapshot for immediate reporting.
pub fn write_snapshot(event: &str, record: &ProcessRecord) -> Result<HealthSnapshot> {
    write_snapshot_to(&paths::health_path(), event, record, None)
}

/// Variant for "stop" snapshots carrying the escalation flag.
pub fn write_stop_snapshot(record: &ProcessRecord, forced: bool) -> Result<HealthSnapshot> {
    write_snapshot_to(&paths::health_path(), "stop", record, Some(forced))
}

pub fn write_snapshot_to(
    path: &Path,
    event: &str,
    record: &ProcessRecord,
    forced: Option<bool>,
) -> Result<HealthSnapshot> {
    let snapshot = HealthSnapshot {
        checked_at: Utc::now(),
        event: event.to_string(),
        daemon: DaemonState::derive(record),
        backend: probe::http_reachable(probe::HEALTH_URL, probe::PROBE_TIMEOUT),
        forced,
    };
    save_snapshot(path, &snapshot)?;
    Ok(snapshot)
}

fn save_snapshot(path: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let temp_path = path.with_extension(format!("json.tmp.{}", std::process::id()));
    let contents = serde_json::to_string_pretty(snapshot)?;

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create {}", temp_path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", temp_path.display()))?;
    }

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to replace {} from {}",
            path.display(),
            temp_path.display()
        )
    })?;
    Ok(())
}
