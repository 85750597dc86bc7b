use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::cli::DoctorOpts;
use crate::envfile::{self, EnvFile};
use crate::paths;
use crate::probe;
use crate::state;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Pass,
    Warn,
    Fail,
}

impl Severity {
    fn icon(&self) -> &'static str {
        match self {
            Severity::Pass => "✓",
            Severity::Warn => "⚠",
            Severity::Fail => "✗",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub severity: Severity,
    pub detail: String,
}

fn pass(name: &'static str, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name,
        severity: Severity::Pass,
        detail: detail.into(),
    }
}

fn warn(name: &'static str, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name,
        severity: Severity::Warn,
        detail: detail.into(),
    }
}

fn fail(name: &'static str, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name,
        severity: Severity::Fail,
        detail: detail.into(),
    }
}

pub fn run(opts: DoctorOpts) -> Result<()> {
    let results = run_checks();

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Running genxctl doctor checks...\n");
        for check in &results {
            println!("{} {}: {}", check.severity.icon(), check.name, check.detail);
        }

        let (passes, warns, fails) = severity_counts(&results);
        println!();
        println!("{} passed, {} warnings, {} failures", passes, warns, fails);
    }

    let (_, _, fails) = severity_counts(&results);
    if fails > 0 {
        bail!("doctor found {} failing check(s)", fails);
    }
    Ok(())
}

pub fn severity_counts(results: &[CheckResult]) -> (usize, usize, usize) {
    let mut counts = (0, 0, 0);
    for check in results {
        match check.severity {
            Severity::Pass => counts.0 += 1,
            Severity::Warn => counts.1 += 1,
            Severity::Fail => counts.2 += 1,
        }
    }
    counts
}

/// The full battery. Each check is independent and side-effect-free, so the
/// report is reproducible regardless of ordering.
fn run_checks() -> Vec<CheckResult> {
    let interpreter = probe::resolve_interpreter();
    let env = EnvFile::load(&paths::env_file_path()).unwrap_or_default();

    let mut results = vec![check_interpreter(interpreter.as_deref())];
    results.push(check_pip());
    results.push(check_module(interpreter.as_deref(), "uvicorn"));
    results.push(check_module(interpreter.as_deref(), "fastapi"));
    results.extend(check_backend_layout());
    results.extend(check_configuration(&env));
    results.push(check_port());
    results.push(check_reachability());
    results
}

fn check_interpreter(interpreter: Option<&std::path::Path>) -> CheckResult {
    match interpreter {
        Some(path) => {
            let version = probe::python_version(path).unwrap_or_else(|| "unknown version".into());
            pass("python", format!("{} ({})", path.display(), version))
        }
        None => fail("python", "no python3/python interpreter on PATH"),
    }
}

fn check_pip() -> CheckResult {
    if probe::command_available("pip3") || probe::command_available("pip") {
        pass("pip", "package manager found on PATH")
    } else {
        warn("pip", "pip not found; installing backend deps will need it")
    }
}

fn check_module(interpreter: Option<&std::path::Path>, module: &'static str) -> CheckResult {
    let Some(interpreter) = interpreter else {
        return fail(module, "cannot check importability without an interpreter");
    };
    if probe::module_importable(interpreter, module) {
        pass(module, "importable")
    } else {
        fail(
            module,
            format!(
                "not importable; run `pip install -r backend/requirements.txt` ({})",
                interpreter.display()
            ),
        )
    }
}

fn check_backend_layout() -> Vec<CheckResult> {
    let Some(backend_dir) = resolve_backend_dir() else {
        return vec![fail(
            "backend layout",
            "backend/app/main.py not found in this directory or any parent",
        )];
    };

    let mut results = vec![pass(
        "backend layout",
        format!("found {}", backend_dir.display()),
    )];

    if backend_dir.join("requirements.txt").exists() {
        results.push(pass("requirements.txt", "present"));
    } else {
        results.push(warn(
            "requirements.txt",
            format!("missing under {}", backend_dir.display()),
        ));
    }
    results
}

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

/// Missing secrets are warnings (the backend has a documented fallback
/// mode); a malformed value is a failure.
fn check_configuration(env: &EnvFile) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if !env.exists() {
        results.push(warn(
            "env file",
            format!(
                "{} missing; run `genxctl onboard` to create it",
                paths::env_file_path().display()
            ),
        ));
    } else {
        results.push(pass(
            "env file",
            format!("{}", paths::env_file_path().display()),
        ));
    }

    for key in [envfile::KEY_OPENAI_API_KEY, envfile::KEY_ADMIN_API_TOKEN] {
        if env.get(key).is_some() {
            results.push(pass(key, "set"));
        } else {
            results.push(warn(key, "not set; backend falls back to offline mode"));
        }
    }

    for problem in env.validate() {
        results.push(fail("env values", problem));
    }

    results
}

fn check_port() -> CheckResult {
    if probe::port_available(probe::BACKEND_PORT) {
        pass(
            "port",
            format!("{} free on 127.0.0.1", probe::BACKEND_PORT),
        )
    } else {
        // The occupant may well be the backend itself; informative only.
        warn(
            "port",
            format!(
                "{} already in use (possibly the backend)",
                probe::BACKEND_PORT
            ),
        )
    }
}

fn check_reachability() -> CheckResult {
    let record = state::load_record().unwrap_or_default();
    let believed_running = record.pid.map(probe::process_alive).unwrap_or(false);

    let result = probe::http_reachable(probe::HEALTH_URL, probe::PROBE_TIMEOUT);
    match (believed_running, result.reachable) {
        (_, true) => pass(
            "reachability",
            format!(
                "{} answered ({})",
                probe::HEALTH_URL,
                result
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no status".into())
            ),
        ),
        (true, false) => warn(
            "reachability",
            format!(
                "backend PID {} is alive but {} is not answering",
                record.pid.unwrap_or(0),
                probe::HEALTH_URL
            ),
        ),
        (false, false) => pass("reachability", "backend not running; probe skipped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_aggregate_by_severity() {
        let results = vec![
            pass("a", ""),
            warn("b", ""),
            warn("c", ""),
            fail("d", ""),
        ];
        assert_eq!(severity_counts(&results), (1, 2, 1));
    }

    #[test]
    fn warnings_never_fail_the_run() {
        let results = vec![pass("a", ""), warn("b", ""), warn("c", "")];
        let (_, warns, fails) = severity_counts(&results);
        assert_eq!(warns, 2);
        assert_eq!(fails, 0);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Fail).expect("serialize"),
            "\"fail\""
        );
    }
}
