//! dimload CLI - warehouse loading with SCD merges, checkpoints and quality gates

use clap::Parser;

mod cli;
mod commands;
mod logging;

use cli::Cli;
use commands::common::ExitCode;
use commands::{checkpoint, quality, run, runs};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(if cli.global.verbose { "debug" } else { "info" });

    let result = match &cli.command {
        cli::Commands::Run(args) => run::execute(args, &cli.global).await,
        cli::Commands::Runs(args) => runs::execute(args, &cli.global).await,
        cli::Commands::Checkpoint(args) => checkpoint::execute(args, &cli.global).await,
        cli::Commands::Quality(args) => quality::execute(args, &cli.global).await,
    };

    if let Err(err) = result {
        if let Some(ExitCode(code)) = err.downcast_ref::<ExitCode>() {
            std::process::exit(*code);
        }
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
