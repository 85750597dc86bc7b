use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::json;

use crate::cli::{StatusOpts, UninstallOpts};
use crate::envfile::EnvFile;
use crate::health;
use crate::paths;
use crate::probe;
use crate::service::{self, LaunchPlan};
use crate::state::{self, Manager};

/// Graceful-shutdown budget: poll every 200 ms, escalate after 3 s, then
/// give the forceful signal 2 s to land. Tests assert on this ordering.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);
const GRACEFUL_BUDGET: Duration = Duration::from_secs(3);
const FORCED_BUDGET: Duration = Duration::from_secs(2);

/// How the last stop terminated the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMethod {
    /// Process was already gone (idempotent success).
    AlreadyStopped,
    Graceful,
    Forced,
}

/// Start the backend detached from this invocation.
pub fn start() -> Result<()> {
    let record = state::load_record()?;

    // Idempotent: a live recorded pid means nothing to do.
    if let Some(pid) = record.pid {
        if probe::process_alive(pid) {
            println!("✓ backend already running (PID {})", pid);
            health::write_snapshot("start", &record)?;
            return Ok(());
        }
    }

    let plan = build_launch_plan()?;
    paths::ensure_state_dir()?;

    println!(
        "Starting backend: {} {}",
        plan.program.display(),
        plan.args.join(" ")
    );

    let pid = spawn_detached(&plan)?;

    let record = state::update_record(|r| {
        r.manager = Manager::SelfManaged;
        r.pid = Some(pid);
        r.started_at = Some(Utc::now());
        r.stopped_at = None;
        r.working_dir = Some(plan.working_dir.clone());
        r.launch_command = std::iter::once(plan.program.display().to_string())
            .chain(plan.args.iter().cloned())
            .collect();
        r.stdout_log = Some(plan.stdout_log.clone());
        r.stderr_log = Some(plan.stderr_log.clone());
    })?;

    // Give uvicorn a moment to bind before the informational probe. A slow
    // boot is not a failed start; the snapshot records what we saw.
    thread::sleep(Duration::from_secs(1));
    let snapshot = health::write_snapshot("start", &record)?;

    println!("✓ backend started (PID {})", pid);
    if snapshot.backend.reachable {
        println!(
            "✓ health endpoint reachable ({})",
            snapshot
                .backend
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no status".to_string())
        );
    } else {
        println!("⚠ health endpoint not reachable yet (may need more time)");
    }

    Ok(())
}

/// Stop the backend with graceful-then-forced escalation.
pub fn stop(quiet: bool) -> Result<StopMethod> {
    let record = state::load_record()?;

    let Some(pid) = record.pid else {
        let record = reconcile_stopped()?;
        health::write_stop_snapshot(&record, false)?;
        if !quiet {
            println!("✓ backend was not running");
        }
        return Ok(StopMethod::AlreadyStopped);
    };

    if !probe::process_alive(pid) {
        // Stale pid: the process died behind our back. Correct the record
        // rather than treating it as an error.
        let record = reconcile_stopped()?;
        health::write_stop_snapshot(&record, false)?;
        if !quiet {
            println!("✓ backend was not running (cleared stale PID {})", pid);
        }
        return Ok(StopMethod::AlreadyStopped);
    }

    let method = terminate_with_escalation(pid)?;

    let record = reconcile_stopped()?;
    health::write_stop_snapshot(&record, method == StopMethod::Forced)?;

    if !quiet {
        match method {
            StopMethod::Graceful => println!("✓ backend stopped (PID {})", pid),
            StopMethod::Forced => {
                println!("⚠ backend force-killed after grace period (PID {})", pid)
            }
            StopMethod::AlreadyStopped => {}
        }
    }

    Ok(method)
}

/// Fresh liveness + reachability view; refreshes the health snapshot.
pub fn status(opts: StatusOpts) -> Result<()> {
    let record = reconcile_record()?;
    let snapshot = health::write_snapshot("status", &record)?;

    if opts.json {
        let view = json!({
            "manager": record.manager.as_str(),
            "running": snapshot.daemon.running,
            "pid": snapshot.daemon.pid,
            "started_at": record.started_at,
            "stopped_at": record.stopped_at,
            "working_dir": record.working_dir,
            "stdout_log": record.stdout_log,
            "stderr_log": record.stderr_log,
            "backend": snapshot.backend,
            "checked_at": snapshot.checked_at,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let icon = if snapshot.daemon.running { "✓" } else { "✗" };
    let word = if snapshot.daemon.running {
        "running"
    } else {
        "stopped"
    };
    print!("{} backend: {}", icon, word);
    if let Some(pid) = snapshot.daemon.pid {
        print!(" [PID {}]", pid);
    }
    println!(" (manager: {})", record.manager.as_str());

    if let Some(started) = record.started_at {
        println!("  started: {}", started.to_rfc3339());
    }
    if let Some(stopped) = record.stopped_at {
        println!("  stopped: {}", stopped.to_rfc3339());
    }
    if let Some(out) = &record.stdout_log {
        println!("  stdout:  {}", out.display());
    }
    if let Some(err) = &record.stderr_log {
        println!("  stderr:  {}", err.display());
    }

    if snapshot.backend.reachable {
        println!(
            "  health:  reachable ({})",
            snapshot
                .backend
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no status".to_string())
        );
    } else {
        println!(
            "  health:  unreachable{}",
            snapshot
                .backend
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }

    Ok(())
}

/// Remove everything this supervisor owns: process, OS registration, state
/// directory. Guarded by an explicit confirmation flag.
pub fn uninstall(opts: UninstallOpts) -> Result<()> {
    if !opts.yes {
        bail!("uninstall is destructive; re-run with --yes to confirm");
    }

    stop(true).context("failed to stop backend before uninstall")?;

    let record = state::load_record()?;
    if let Some(manager) = service::manager_for(record.manager) {
        // Unregister before deleting any files so the OS never keeps a
        // registration pointing at a removed plist/unit.
        manager
            .unregister()
            .with_context(|| format!("failed to unregister {}", record.manager.as_str()))?;
        state::update_record(|r| {
            r.uninstalled_at = Some(Utc::now());
        })?;
        println!("✓ removed {} registration", record.manager.as_str());
    }

    let dir = paths::state_dir();
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("failed to remove {}", dir.display()))?;
        println!("✓ removed {}", dir.display());
    }

    println!("✓ uninstall complete");
    Ok(())
}

/// Clear a stale or stopped pid in the record, keeping everything else.
fn reconcile_stopped() -> Result<state::ProcessRecord> {
    state::update_record(|r| {
        r.pid = None;
        if r.stopped_at.is_none() {
            r.stopped_at = Some(Utc::now());
        }
    })
}

/// Load the record and correct it if the recorded pid no longer exists.
pub fn reconcile_record() -> Result<state::ProcessRecord> {
    let record = state::load_record()?;
    if let Some(pid) = record.pid {
        if !probe::process_alive(pid) {
            tracing::warn!(pid, "recorded pid no longer exists; reconciling record");
            return reconcile_stopped();
        }
    }
    Ok(record)
}

/// Build the uvicorn launch plan: interpreter, backend working directory,
/// and append-mode log destinations.
pub fn build_launch_plan() -> Result<LaunchPlan> {
    let interpreter = probe::resolve_interpreter().ok_or_else(|| {
        anyhow::anyhow!(
            "no python interpreter found on PATH; install Python 3 and re-run `genxctl doctor`"
        )
    })?;

    if !probe::module_importable(&interpreter, "uvicorn") {
        bail!(
            "uvicorn is not importable under {}; run `pip install -r backend/requirements.txt`",
            interpreter.display()
        );
    }

    let backend_dir = resolve_backend_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "backend/app/main.py not found in this directory or any parent; \
             run genxctl from the GenXBot checkout"
        )
    })?;

    let (stdout_log, stderr_log) = paths::log_paths();

    Ok(LaunchPlan {
        program: interpreter,
        args: vec![
            "-m".into(),
            "uvicorn".into(),
            "app.main:app".into(),
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            probe::BACKEND_PORT.to_string(),
        ],
        working_dir: backend_dir,
        stdout_log,
        stderr_log,
    })
}

/// Walk up from the current directory looking for backend/app/main.py.
fn resolve_backend_dir() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    loop {
        let candidate = current.join("backend");
        if candidate.join("app/main.py").exists() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Launch the plan detached: own process group, stdin closed, stdout/stderr
/// appended to the log files. The child survives this CLI's exit.
fn spawn_detached(plan: &LaunchPlan) -> Result<u32> {
    let stdout_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&plan.stdout_log)
        .with_context(|| format!("failed to open {}", plan.stdout_log.display()))?;
    let stderr_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&plan.stderr_log)
        .with_context(|| format!("failed to open {}", plan.stderr_log.display()))?;

    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .current_dir(&plan.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout_file)
        .stderr(stderr_file);

    // Inject the supervisor-managed configuration into the backend.
    let env = EnvFile::load(&paths::env_file_path())?;
    for (key, value) in env.values() {
        if !value.is_empty() {
            cmd.env(key, value);
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to start backend from {}", plan.working_dir.display()))?;

    Ok(child.id())
}

/// SIGTERM, bounded poll, SIGKILL. Only a process that survives SIGKILL is
/// a hard error.
fn terminate_with_escalation(pid: u32) -> Result<StopMethod> {
    signal(pid, "-TERM")?;
    if wait_for_exit(pid, GRACEFUL_BUDGET) {
        return Ok(StopMethod::Graceful);
    }

    tracing::warn!(pid, "graceful shutdown timed out; sending SIGKILL");
    signal(pid, "-KILL")?;
    if wait_for_exit(pid, FORCED_BUDGET) {
        return Ok(StopMethod::Forced);
    }

    bail!("backend (PID {}) survived SIGKILL; stop it manually", pid)
}

fn wait_for_exit(pid: u32, budget: Duration) -> bool {
    let deadline = std::time::Instant::now() + budget;
    while std::time::Instant::now() < deadline {
        if !probe::process_alive(pid) {
            return true;
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }
    !probe::process_alive(pid)
}

fn signal(pid: u32, sig: &str) -> Result<()> {
    #[cfg(unix)]
    {
        // Signal the whole process group first (the child was spawned as a
        // group leader), then the pid directly as a fallback.
        let group = Command::new("kill")
            .arg(sig)
            .arg("--")
            .arg(format!("-{}", pid))
            .stderr(Stdio::null())
            .status();

        let direct = Command::new("kill")
            .arg(sig)
            .arg(pid.to_string())
            .stderr(Stdio::null())
            .status()
            .context("failed to invoke kill")?;

        if direct.success() || group.map(|s| s.success()).unwrap_or(false) {
            return Ok(());
        }
        // The process may have exited between the liveness check and the
        // signal; that is not a failure.
        if !probe::process_alive(pid) {
            return Ok(());
        }
        bail!("kill {} {} failed", sig, pid)
    }

    #[cfg(windows)]
    {
        let _ = sig;
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .status()
            .context("failed to invoke taskkill")?;
        if status.success() || !probe::process_alive(pid) {
            return Ok(());
        }
        bail!("taskkill {} failed", pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes the tests that point GENXBOT_HOME at a scratch directory.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn uninstall_without_confirmation_leaves_state_untouched() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = TempDir::new().expect("tempdir");
        unsafe { std::env::set_var("GENXBOT_HOME", dir.path()) };

        fs::create_dir_all(dir.path().join("logs")).expect("mkdir");
        fs::write(dir.path().join("daemon.json"), "{}").expect("seed record");

        let err = uninstall(UninstallOpts { yes: false }).expect_err("must refuse");
        assert!(err.to_string().contains("--yes"));

        // Refusal means zero side effects: seeded file still there, nothing
        // new written.
        assert!(dir.path().join("daemon.json").exists());
        assert!(!dir.path().join("health.json").exists());

        unsafe { std::env::remove_var("GENXBOT_HOME") };
    }

    #[test]
    fn reconcile_clears_dead_pid_without_error() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = TempDir::new().expect("tempdir");
        unsafe { std::env::set_var("GENXBOT_HOME", dir.path()) };

        state::update_record(|r| {
            r.pid = Some(u32::MAX - 2);
            r.started_at = Some(Utc::now());
        })
        .expect("seed record");

        let record = reconcile_record().expect("reconcile");
        assert!(record.pid.is_none());
        assert!(record.stopped_at.is_some());
        // Unrelated fields survive the correction.
        assert!(record.started_at.is_some());

        unsafe { std::env::remove_var("GENXBOT_HOME") };
    }

    #[test]
    fn stop_twice_reports_success_both_times() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = TempDir::new().expect("tempdir");
        unsafe { std::env::set_var("GENXBOT_HOME", dir.path()) };

        // Nothing was ever started; both stops are idempotent successes.
        let first = stop(true).expect("first stop");
        let second = stop(true).expect("second stop");
        assert_eq!(first, StopMethod::AlreadyStopped);
        assert_eq!(second, StopMethod::AlreadyStopped);

        let raw = fs::read_to_string(dir.path().join("health.json")).expect("read snapshot");
        let snapshot: health::HealthSnapshot = serde_json::from_str(&raw).expect("parse snapshot");
        assert_eq!(snapshot.event, "stop");
        assert_eq!(snapshot.forced, Some(false));

        unsafe { std::env::remove_var("GENXBOT_HOME") };
    }

    #[test]
    fn stop_with_stale_pid_succeeds_and_clears_it() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = TempDir::new().expect("tempdir");
        unsafe { std::env::set_var("GENXBOT_HOME", dir.path()) };

        state::update_record(|r| {
            r.pid = Some(u32::MAX - 2);
        })
        .expect("seed record");

        let method = stop(true).expect("stop");
        assert_eq!(method, StopMethod::AlreadyStopped);

        let record = state::load_record().expect("load");
        assert!(record.pid.is_none());
        assert!(record.stopped_at.is_some());

        unsafe { std::env::remove_var("GENXBOT_HOME") };
    }

    #[test]
    #[cfg(unix)]
    fn start_twice_keeps_the_same_pid() {
        let _guard = ENV_LOCK.lock().expect("env lock");
        let dir = TempDir::new().expect("tempdir");
        unsafe { std::env::set_var("GENXBOT_HOME", dir.path()) };

        // A live recorded pid stands in for an already-running backend.
        let pid = spawn_group_leader("sleep 30");
        state::update_record(|r| {
            r.pid = Some(pid);
            r.started_at = Some(Utc::now());
        })
        .expect("seed record");

        start().expect("first start");
        start().expect("second start");

        let record = state::load_record().expect("load");
        assert_eq!(record.pid, Some(pid));

        let raw = fs::read_to_string(dir.path().join("health.json")).expect("read snapshot");
        let snapshot: health::HealthSnapshot = serde_json::from_str(&raw).expect("parse snapshot");
        assert_eq!(snapshot.event, "start");

        terminate_with_escalation(pid).expect("cleanup");
        unsafe { std::env::remove_var("GENXBOT_HOME") };
    }

    #[cfg(unix)]
    fn spawn_group_leader(script: &str) -> u32 {
        use std::os::unix::process::CommandExt;
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.process_group(0);
        let mut child = cmd.spawn().expect("spawn test child");
        let pid = child.id();
        // Reap in the background so kill -0 stops succeeding once the child
        // actually exits (an unreaped zombie still answers the signal).
        thread::spawn(move || {
            let _ = child.wait();
        });
        pid
    }

    #[test]
    #[cfg(unix)]
    fn graceful_stop_of_cooperative_process() {
        let pid = spawn_group_leader("sleep 30");
        assert!(probe::process_alive(pid));

        let method = terminate_with_escalation(pid).expect("stop");
        assert_eq!(method, StopMethod::Graceful);
        assert!(!probe::process_alive(pid));
    }

    #[test]
    #[cfg(unix)]
    fn escalation_kills_sigterm_ignoring_process() {
        // The trap makes SIGTERM a no-op, forcing the SIGKILL path.
        let pid = spawn_group_leader("trap '' TERM; while true; do sleep 1; done");
        assert!(probe::process_alive(pid));

        let method = terminate_with_escalation(pid).expect("stop");
        assert_eq!(method, StopMethod::Forced);
        assert!(!probe::process_alive(pid));
    }

    #[test]
    #[cfg(unix)]
    fn wait_for_exit_observes_quick_death() {
        let pid = spawn_group_leader("true");
        assert!(wait_for_exit(pid, Duration::from_secs(2)));
    }
}
