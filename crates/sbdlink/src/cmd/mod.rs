use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod check;
pub mod inspect;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway until interrupted.
    Run(RunArgs),
    /// Validate a configuration file and print the effective settings.
    Check(CheckArgs),
    /// Decode SBD blocks (or bare MAVLink packets) given as hex.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Check(args) => check::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file (TOML).
    #[arg(long, short = 'c', env = "SBDLINK_CONFIG")]
    pub config: PathBuf,
    /// Use the loopback uplink regardless of the configured one.
    #[arg(long)]
    pub dry_run: bool,
    /// Print gateway events to stdout as they happen.
    #[arg(long)]
    pub events: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file (TOML).
    #[arg(long, short = 'c', env = "SBDLINK_CONFIG")]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Hex-encoded blocks, in arrival order. Fragments of one message are
    /// reassembled across arguments.
    #[arg(required = true, value_name = "HEX")]
    pub blocks: Vec<String>,
    /// Treat input as bare MAVLink packets without a frame header.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build details and channel defaults.
    #[arg(long)]
    pub extended: bool,
}
