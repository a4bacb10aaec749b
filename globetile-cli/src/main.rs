//! Globetile CLI - Command-line interface
//!
//! Drives the globetile library without a GPU: inspect level pyramids, run a
//! headless frame loop against a synthetic tile source, fetch single tiles
//! and manage the configuration file.

mod commands;
mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;

use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::levels::LevelsArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "globetile", version, about = "Multi-resolution globe tiling engine")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Configuration file (defaults to ~/.globetile/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the levels of a tile pyramid
    Levels(LevelsArgs),

    /// Run a headless frame loop against a synthetic tile source
    Simulate(SimulateArgs),

    /// Retrieve a single tile over HTTP
    Fetch(FetchArgs),

    /// View or initialize the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::load_config(cli.config.as_deref())?;
    debug!(version = globetile::VERSION, "Starting globetile");

    match cli.command {
        Commands::Levels(args) => commands::levels::run(args, &config),
        Commands::Simulate(args) => commands::simulate::run(args, &config),
        Commands::Fetch(args) => commands::fetch::run(args, &config),
        Commands::Config(command) => commands::config::run(command, &config, cli.config.as_deref()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init_logging(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
