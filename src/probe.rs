use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

/// Default backend bind address and health endpoint.
pub const BACKEND_PORT: u16 = 8000;
pub const HEALTH_URL: &str = "http://127.0.0.1:8000/health";
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(750);

/// Result of an HTTP reachability probe. Any response counts as reachable
/// (a 5xx is still a listening backend); only connect failure or timeout is
/// unreachable. The status code is surfaced so callers can alert on it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Reachability {
    pub reachable: bool,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Whether a command exists on PATH. Lookup only; never executes the target.
pub fn command_available(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Whether we can bind the port ourselves. `false` means something else is
/// listening, which may well be the backend.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Bounded-time GET against the backend. Never errors; inability to reach
/// the endpoint is itself the answer.
pub fn http_reachable(url: &str, timeout: Duration) -> Reachability {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(err) => {
            return Reachability {
                reachable: false,
                status: None,
                error: Some(err.to_string()),
            };
        }
    };

    match client.get(url).send() {
        Ok(resp) => Reachability {
            reachable: true,
            status: Some(resp.status().as_u16()),
            error: None,
        },
        Err(err) => Reachability {
            reachable: false,
            status: None,
            error: Some(err.to_string()),
        },
    }
}

/// Whether `import <module>` succeeds under the given interpreter.
pub fn module_importable(interpreter: &Path, module: &str) -> bool {
    Command::new(interpreter)
        .arg("-c")
        .arg(format!("import {}", module))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Prefer python3; fall back to python.
pub fn resolve_interpreter() -> Option<PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

/// "Python 3.12.1" from `--version`, if the interpreter answers.
pub fn python_version(interpreter: &Path) -> Option<String> {
    let output = Command::new(interpreter).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = if output.stdout.is_empty() {
        // Old interpreters print the version to stderr.
        String::from_utf8_lossy(&output.stderr).to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).to_string()
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Check if a process is alive.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(windows)]
    {
        Command::new("tasklist")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map(|o| {
                o.status.success() && String::from_utf8_lossy(&o.stdout).contains(&pid.to_string())
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_port_reports_unavailable() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        assert!(!port_available(port));
        drop(listener);
        assert!(port_available(port));
    }

    #[test]
    fn reachable_includes_server_errors() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/health").with_status(500).create();

        let result = http_reachable(&format!("{}/health", server.url()), PROBE_TIMEOUT);
        assert!(result.reachable);
        assert_eq!(result.status, Some(500));
        assert!(result.error.is_none());
    }

    #[test]
    fn unreachable_on_connection_failure() {
        // Port just bound and dropped; nothing is listening.
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let result = http_reachable(
            &format!("http://127.0.0.1:{}/health", port),
            Duration::from_millis(250),
        );
        assert!(!result.reachable);
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn nonexistent_command_is_unavailable() {
        assert!(!command_available("genxctl-definitely-not-a-real-tool"));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
