//! Command-line surface over the core library.
//!
//! Exit codes: 0 success, 2 usage or configuration, 3 I/O and setup,
//! 4 execution failure, 5 internal.

mod commands;

use clap::Parser;
use simwrap_core::manifest::ManifestError;
use simwrap_core::{ConfigurationError, RunError};

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().collect();
    match parse_and_dispatch(args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            error.exit_code()
        }
    }
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => dispatch_parsed(cli.command),
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "simwrap-rs",
    about = "Parameter-sweep and run orchestration for external simulation codes"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Apply one keyword change to an input file
    Patch(commands::PatchArgs),
    /// Expand a sweep manifest into run names and per-run changes
    Sweep(commands::SweepArgs),
    /// Set up, execute, and finish a single run from a manifest
    Run(commands::RunArgs),
    /// Execute a whole study of run sequences from a manifest
    Study(commands::StudyArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Patch(args) => commands::run_patch_command(args),
        CliCommand::Sweep(args) => commands::run_sweep_command(args),
        CliCommand::Run(args) => commands::run_run_command(args),
        CliCommand::Study(args) => commands::run_study_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<ConfigurationError> for CliError {
    fn from(error: ConfigurationError) -> Self {
        Self::Run(RunError::Configuration(error))
    }
}

impl From<simwrap_core::PatchError> for CliError {
    fn from(error: simwrap_core::PatchError) -> Self {
        Self::Run(RunError::Patch(error))
    }
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Manifest(ManifestError::Read { .. }) => 3,
            Self::Manifest(_) => 2,
            Self::Run(error) => error.exit_code(),
            Self::Internal(_) => 5,
        }
    }
}
