use anyhow::Result;
use clap::Parser;
use tracing::error;

fn main() -> Result<()> {
    let cli = streak_tracker_cli::Cli::parse();
    streak_tracker_cli::init_tracing(cli.log_level());
    streak_tracker_cli::run_cli(cli).inspect_err(|err| {
        error!("streak command failed: {err:#}");
    })
}
