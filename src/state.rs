use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::paths;

/// Which mechanism owns the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Manager {
    #[default]
    SelfManaged,
    Launchd,
    Systemd,
}

impl Manager {
    pub fn as_str(&self) -> &'static str {
        match self {
            Manager::SelfManaged => "self_managed",
            Manager::Launchd => "launchd",
            Manager::Systemd => "systemd",
        }
    }
}

/// Durable record of the last supervised backend process. This file is the
/// supervisor's only memory between invocations; liveness is always
/// re-checked against the OS before acting on it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessRecord {
    #[serde(default)]
    pub manager: Manager,
    /// Set only while the process is believed alive.
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Program plus arguments used for the last start.
    #[serde(default)]
    pub launch_command: Vec<String>,
    #[serde(default)]
    pub stdout_log: Option<PathBuf>,
    #[serde(default)]
    pub stderr_log: Option<PathBuf>,
    /// Set when the service-manager registration is removed.
    #[serde(default)]
    pub uninstalled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Load the record; a missing file yields a defaulted record, never an error.
pub fn load_record() -> Result<ProcessRecord> {
    load_record_from(&paths::record_path())
}

pub fn load_record_from(path: &Path) -> Result<ProcessRecord> {
    if !path.exists() {
        return Ok(ProcessRecord::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (record, recovered) = parse_record(&contents, path)?;
    if recovered {
        save_record_to(path, &record)?;
    }
    Ok(record)
}

fn parse_record(contents: &str, path: &Path) -> Result<(ProcessRecord, bool)> {
    match serde_json::from_str::<ProcessRecord>(contents) {
        Ok(record) => Ok((record, false)),
        Err(primary_err) => {
            // Accept the first valid JSON value and drop trailing garbage
            // left behind by an interrupted write.
            let mut de = serde_json::Deserializer::from_str(contents);
            match ProcessRecord::deserialize(&mut de) {
                Ok(record) => {
                    warn!(
                        path = %path.display(),
                        error = %primary_err,
                        "daemon.json contained trailing/invalid suffix; recovered first JSON value"
                    );
                    Ok((record, true))
                }
                Err(_) => {
                    Err(primary_err).with_context(|| format!("failed to parse {}", path.display()))
                }
            }
        }
    }
}

/// Read-merge-write: load the current record, apply a partial mutation,
/// refresh `updated_at`, and persist atomically. Fields the closure does not
/// touch survive unchanged.
pub fn update_record<F>(mutate: F) -> Result<ProcessRecord>
where
    F: FnOnce(&mut ProcessRecord),
{
    update_record_at(&paths::record_path(), mutate)
}

pub fn update_record_at<F>(path: &Path, mutate: F) -> Result<ProcessRecord>
where
    F: FnOnce(&mut ProcessRecord),
{
    let mut record = load_record_from(path)?;
    mutate(&mut record);
    record.updated_at = Some(Utc::now());
    save_record_to(path, &record)?;
    Ok(record)
}

/// Atomically save the record (write to temp, then rename).
pub fn save_record_to(path: &Path, record: &ProcessRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let temp_path = path.with_extension(format!("json.tmp.{}", std::process::id()));
    let contents = serde_json::to_string_pretty(record)?;

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

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_default_record() {
        let dir = TempDir::new().expect("tempdir");
        let record = load_record_from(&dir.path().join("daemon.json")).expect("load");
        assert_eq!(record.manager, Manager::SelfManaged);
        assert!(record.pid.is_none());
    }

    #[test]
    fn update_is_a_partial_merge() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("daemon.json");

        update_record_at(&path, |r| {
            r.manager = Manager::Launchd;
            r.pid = Some(4242);
            r.launch_command = vec!["python3".into(), "-m".into(), "uvicorn".into()];
        })
        .expect("first update");

        let record = update_record_at(&path, |r| {
            r.pid = None;
            r.stopped_at = Some(Utc::now());
        })
        .expect("second update");

        // Untouched fields carried over.
        assert_eq!(record.manager, Manager::Launchd);
        assert_eq!(record.launch_command.len(), 3);
        assert!(record.pid.is_none());
        assert!(record.stopped_at.is_some());
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn parse_recovers_from_trailing_garbage() {
        let raw = "{\n  \"pid\": 99\n}\n}  }\n";
        let (record, recovered) = parse_record(raw, Path::new("daemon.json")).expect("recover");
        assert!(recovered);
        assert_eq!(record.pid, Some(99));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let raw = "{\"pid\": 7, \"future_field\": {\"nested\": true}}";
        let (record, recovered) = parse_record(raw, Path::new("daemon.json")).expect("parse");
        assert!(!recovered);
        assert_eq!(record.pid, Some(7));
    }

    #[test]
    fn manager_serializes_snake_case() {
        let json = serde_json::to_string(&Manager::SelfManaged).expect("serialize");
        assert_eq!(json, "\"self_managed\"");
    }
}
