use clap::{Args, Parser, Subcommand};

/// Command line interface for the GenXBot backend supervisor.
#[derive(Parser, Debug)]
#[command(
    name = "genxctl",
    version,
    about = "Supervise the GenXBot backend: start, stop, status, logs, doctor."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Set up the per-user config and optionally a background service.",
        long_about = "Creates ~/.genxbot with a starter .env (never clobbering an existing one). \
                      Use --interactive to fill in keys, --install-daemon to register the backend \
                      with launchd/systemd."
    )]
    Onboard(OnboardOpts),
    #[command(
        about = "Start the backend detached from this shell.",
        long_about = "Launches uvicorn in its own process group with stdout/stderr appended to \
                      ~/.genxbot/logs, records the PID, and probes the health endpoint. A backend \
                      that is already running is left alone."
    )]
    Start,
    #[command(
        about = "Stop the backend (SIGTERM, then SIGKILL after a grace period)."
    )]
    Stop,
    #[command(
        about = "Show backend liveness and health endpoint reachability.",
        long_about = "Re-checks the recorded PID against the OS and probes the health endpoint, \
                      refreshing ~/.genxbot/health.json as a side effect."
    )]
    Status(StatusOpts),
    #[command(about = "Tail the backend stdout/stderr logs.")]
    Logs(LogsOpts),
    #[command(
        about = "Stop the backend and delete everything under ~/.genxbot.",
        long_about = "Stops the backend, removes any launchd/systemd registration, and deletes \
                      the per-user state directory. Refuses to run without --yes."
    )]
    Uninstall(UninstallOpts),
    #[command(about = "Verify interpreter, dependencies, config, port, and reachability.")]
    Doctor(DoctorOpts),
}

#[derive(Args, Debug, Clone, Default)]
pub struct OnboardOpts {
    /// Prompt for configuration values instead of only writing the template.
    #[arg(long)]
    pub interactive: bool,
    /// Register the backend with the OS service manager (launchd/systemd).
    #[arg(long)]
    pub install_daemon: bool,
    /// Accept defaults without prompting.
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StatusOpts {
    /// Emit the composite status as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LogsOpts {
    /// Show only the stdout log.
    #[arg(long, conflicts_with = "err")]
    pub out: bool,
    /// Show only the stderr log.
    #[arg(long)]
    pub err: bool,
    /// Number of lines to show from the end of each log.
    #[arg(long, short = 'n', default_value_t = 50)]
    pub lines: usize,
    /// Keep printing new log lines until Ctrl+C.
    #[arg(long, short)]
    pub follow: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UninstallOpts {
    /// Confirm the destructive uninstall.
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DoctorOpts {
    /// Emit the check report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_logs_flags() {
        let cli = Cli::parse_from(["genxctl", "logs", "--err", "-n", "20", "--follow"]);
        match cli.command {
            Commands::Logs(opts) => {
                assert!(opts.err);
                assert!(!opts.out);
                assert_eq!(opts.lines, 20);
                assert!(opts.follow);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn out_and_err_conflict() {
        assert!(Cli::try_parse_from(["genxctl", "logs", "--out", "--err"]).is_err());
    }

    #[test]
    fn uninstall_defaults_to_unconfirmed() {
        let cli = Cli::parse_from(["genxctl", "uninstall"]);
        match cli.command {
            Commands::Uninstall(opts) => assert!(!opts.yes),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["genxctl", "restart"]).is_err());
    }
}
