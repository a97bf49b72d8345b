//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};

/// dimload - load dimension and fact tables into a DuckDB warehouse
#[derive(Parser, Debug)]
#[command(name = "dl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "dimload.yml")]
    pub config: String,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load entities: dimensions first, then facts
    Run(RunArgs),

    /// List recent pipeline runs or abort a stuck one
    Runs(RunsArgs),

    /// Inspect or reset extraction checkpoints
    Checkpoint(CheckpointArgs),

    /// Show the quality check results of a run
    Quality(QualityArgs),
}

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Entity names to load (comma-separated, default: all)
    #[arg(short, long)]
    pub entities: Option<String>,

    /// Load mode (default: the configured `load_mode`)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,
}

/// Load mode as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Reprocess the whole source
    Full,
    /// Only records after the committed checkpoint
    Incremental,
}

impl From<ModeArg> for dl_core::LoadMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => dl_core::LoadMode::Full,
            ModeArg::Incremental => dl_core::LoadMode::Incremental,
        }
    }
}

/// Arguments for the runs command
#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: Option<RunsCommands>,

    /// Number of runs to list
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// Mark a run left `running` by a crashed process as failed
    Abort(AbortArgs),
}

#[derive(Args, Debug)]
pub struct AbortArgs {
    /// Run id to abort
    pub run_id: String,

    /// Reason stored on the run
    #[arg(short, long, default_value = "manual abort")]
    pub reason: String,
}

/// Arguments for the checkpoint command
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    #[command(subcommand)]
    pub command: CheckpointCommands,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// List every checkpoint
    List,

    /// Delete an entity's checkpoint so the next incremental run starts over
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Entity whose checkpoint is deleted
    pub entity: String,
}

/// Arguments for the quality command
#[derive(Args, Debug)]
pub struct QualityArgs {
    /// Run id whose results are shown
    pub run_id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
