use anyhow::Result;
use clap::Parser;
use genxctl::{
    cli::{Cli, Commands},
    doctor, init_tracing, lifecycle, logs, onboard,
};

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Onboard(opts) => onboard::run(opts)?,
        Commands::Start => lifecycle::start()?,
        Commands::Stop => {
            lifecycle::stop(false)?;
        }
        Commands::Status(opts) => lifecycle::status(opts)?,
        Commands::Logs(opts) => logs::run(opts)?,
        Commands::Uninstall(opts) => lifecycle::uninstall(opts)?,
        Commands::Doctor(opts) => doctor::run(opts)?,
    }

    Ok(())
}
