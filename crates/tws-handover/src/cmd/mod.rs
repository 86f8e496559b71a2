use clap::{Args, Subcommand};
use std::path::PathBuf;

use handover_profile::MAX_CLIENTS;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod config;
pub mod decode;
pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run handovers between two simulated earbuds.
    Simulate(SimulateArgs),
    /// Decode captured handover channel packets (hex).
    Decode(DecodeArgs),
    /// Print the effective timing configuration.
    Config(ConfigArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Config(args) => config::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// JSON file with timing overrides.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Handover clients registered on each earbud.
    #[arg(long, default_value = "2")]
    pub clients: usize,
    /// Bytes of state each client marshals.
    #[arg(long, value_name = "BYTES", default_value = "32")]
    pub payload_size: usize,
    /// Bytes of baseband state handed over after the client state.
    #[arg(long, value_name = "BYTES", default_value = "0")]
    pub p0_size: usize,
    /// Handovers to run; the role bounces between the earbuds.
    #[arg(long, default_value = "1")]
    pub rounds: usize,
    /// Make the first client veto the Nth time it is asked.
    #[arg(long, value_name = "N")]
    pub veto_at: Option<usize>,
    /// Simulate audio mirroring (changes commit ordering).
    #[arg(long)]
    pub a2dp: bool,
    /// Leave the secondary unattended so the primary times out.
    #[arg(long)]
    pub unresponsive: bool,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Packets as hex strings, e.g. 8000000201 02ff. Separators are ignored.
    #[arg(required = true, num_args = 1..)]
    pub packets: Vec<String>,
    /// Registered client count used to interpret marshal tags.
    #[arg(long, default_value_t = MAX_CLIENTS)]
    pub clients: usize,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// JSON file with overrides on top of the defaults.
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
