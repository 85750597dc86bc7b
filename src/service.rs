use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::state::Manager;

pub const LAUNCHD_LABEL: &str = "com.genxbot.backend";
pub const SYSTEMD_UNIT: &str = "genxbot-backend.service";

/// Everything a service manager needs to launch the backend on its own.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

/// Pluggable OS-level registration strategy. The supervisor records which
/// strategy is active in `ProcessRecord.manager` so uninstall can call the
/// matching unregister path.
pub trait ServiceManager {
    fn manager(&self) -> Manager;
    fn register(&self, plan: &LaunchPlan) -> Result<()>;
    fn unregister(&self) -> Result<()>;
}

/// Strategy for the current platform, if one exists.
pub fn platform_manager() -> Option<Box<dyn ServiceManager>> {
    #[cfg(target_os = "macos")]
    {
        Some(Box::new(LaunchdService))
    }
    #[cfg(target_os = "linux")]
    {
        Some(Box::new(SystemdService))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Strategy matching a recorded manager, for unregistration.
pub fn manager_for(manager: Manager) -> Option<Box<dyn ServiceManager>> {
    match manager {
        Manager::SelfManaged => None,
        Manager::Launchd => Some(Box::new(LaunchdService)),
        Manager::Systemd => Some(Box::new(SystemdService)),
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub struct LaunchdService;

impl LaunchdService {
    fn plist_path(&self) -> PathBuf {
        home_dir()
            .join("Library/LaunchAgents")
            .join(format!("{}.plist", LAUNCHD_LABEL))
    }
}

impl ServiceManager for LaunchdService {
    fn manager(&self) -> Manager {
        Manager::Launchd
    }

    fn register(&self, plan: &LaunchPlan) -> Result<()> {
        let path = self.plist_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut program_arguments = String::new();
        program_arguments.push_str(&format!(
            "        <string>{}</string>\n",
            plan.program.display()
        ));
        for arg in &plan.args {
            program_arguments.push_str(&format!("        <string>{}</string>\n", arg));
        }

        let plist = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{program_arguments}    </array>
    <key>WorkingDirectory</key>
    <string>{working_dir}</string>
    <key>StandardOutPath</key>
    <string>{stdout_log}</string>
    <key>StandardErrorPath</key>
    <string>{stderr_log}</string>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
            label = LAUNCHD_LABEL,
            program_arguments = program_arguments,
            working_dir = plan.working_dir.display(),
            stdout_log = plan.stdout_log.display(),
            stderr_log = plan.stderr_log.display(),
        );

        fs::write(&path, plist).with_context(|| format!("failed to write {}", path.display()))?;

        let status = Command::new("launchctl")
            .arg("load")
            .arg(&path)
            .status()
            .context("failed to invoke launchctl")?;
        if !status.success() {
            bail!("launchctl load exited with status {}", status.code().unwrap_or(-1));
        }
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        let path = self.plist_path();
        if !path.exists() {
            return Ok(());
        }

        // Unload the job before removing the plist so launchd never holds a
        // registration pointing at a deleted file.
        let _ = Command::new("launchctl").arg("unload").arg(&path).status();

        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        Ok(())
    }
}

pub struct SystemdService;

impl SystemdService {
    fn unit_path(&self) -> PathBuf {
        home_dir().join(".config/systemd/user").join(SYSTEMD_UNIT)
    }
}

impl ServiceManager for SystemdService {
    fn manager(&self) -> Manager {
        Manager::Systemd
    }

    fn register(&self, plan: &LaunchPlan) -> Result<()> {
        let path = self.unit_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut exec_start = plan.program.display().to_string();
        for arg in &plan.args {
            exec_start.push(' ');
            exec_start.push_str(arg);
        }

        let unit = format!(
            "[Unit]\n\
             Description=GenXBot backend\n\
             After=network.target\n\n\
             [Service]\n\
             ExecStart={exec_start}\n\
             WorkingDirectory={working_dir}\n\
             StandardOutput=append:{stdout_log}\n\
             StandardError=append:{stderr_log}\n\
             Restart=no\n\n\
             [Install]\n\
             WantedBy=default.target\n",
            exec_start = exec_start,
            working_dir = plan.working_dir.display(),
            stdout_log = plan.stdout_log.display(),
            stderr_log = plan.stderr_log.display(),
        );

        fs::write(&path, unit).with_context(|| format!("failed to write {}", path.display()))?;

        let status = Command::new("systemctl")
            .args(["--user", "daemon-reload"])
            .status()
            .context("failed to invoke systemctl")?;
        if !status.success() {
            bail!("systemctl daemon-reload exited with status {}", status.code().unwrap_or(-1));
        }

        let status = Command::new("systemctl")
            .args(["--user", "enable", SYSTEMD_UNIT])
            .status()
            .context("failed to invoke systemctl")?;
        if !status.success() {
            bail!("systemctl enable exited with status {}", status.code().unwrap_or(-1));
        }
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        let path = self.unit_path();
        if !path.exists() {
            return Ok(());
        }

        // Disable before deleting the unit file, same ordering as launchd.
        let _ = Command::new("systemctl")
            .args(["--user", "disable", "--now", SYSTEMD_UNIT])
            .status();

        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        let _ = Command::new("systemctl")
            .args(["--user", "daemon-reload"])
            .status();
        Ok(())
    }
}
