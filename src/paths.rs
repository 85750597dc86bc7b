use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Per-user state directory: ~/.genxbot (override with GENXBOT_HOME).
///
/// Everything the supervisor persists lives under this directory: the env
/// file, the process record, the health snapshot, and the backend logs.
pub fn state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("GENXBOT_HOME") {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".genxbot")
}

/// Create the state directory (and logs subdirectory) if missing.
pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = state_dir();
    ensure_state_dir_in(&dir)?;
    Ok(dir)
}

pub fn ensure_state_dir_in(base: &Path) -> Result<()> {
    fs::create_dir_all(base.join("logs"))
        .with_context(|| format!("failed to create {}", base.join("logs").display()))?;
    Ok(())
}

pub fn env_file_path() -> PathBuf {
    env_file_path_in(&state_dir())
}

pub fn env_file_path_in(base: &Path) -> PathBuf {
    base.join(".env")
}

pub fn record_path() -> PathBuf {
    record_path_in(&state_dir())
}

pub fn record_path_in(base: &Path) -> PathBuf {
    base.join("daemon.json")
}

pub fn health_path() -> PathBuf {
    health_path_in(&state_dir())
}

pub fn health_path_in(base: &Path) -> PathBuf {
    base.join("health.json")
}

/// Append-only stdout/stderr log files for the backend process.
pub fn log_paths() -> (PathBuf, PathBuf) {
    log_paths_in(&state_dir())
}

pub fn log_paths_in(base: &Path) -> (PathBuf, PathBuf) {
    let logs = base.join("logs");
    (logs.join("backend.out.log"), logs.join("backend.err.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_base_dir() {
        let base = Path::new("/tmp/genxbot-test");
        assert_eq!(
            env_file_path_in(base),
            PathBuf::from("/tmp/genxbot-test/.env")
        );
        assert_eq!(
            record_path_in(base),
            PathBuf::from("/tmp/genxbot-test/daemon.json")
        );
        let (out, err) = log_paths_in(base);
        assert_eq!(out, PathBuf::from("/tmp/genxbot-test/logs/backend.out.log"));
        assert_eq!(err, PathBuf::from("/tmp/genxbot-test/logs/backend.err.log"));
    }

    #[test]
    fn ensure_creates_logs_subdir() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        ensure_state_dir_in(dir.path()).expect("ensure");
        assert!(dir.path().join("logs").is_dir());
    }
}
