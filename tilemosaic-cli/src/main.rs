//! Tilemosaic CLI - Command-line interface
//!
//! Merges the slices of a mosaic manifest into one MBTiles or PMTiles
//! archive, and inspects existing tile sources.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use tilemosaic::logging::init_logging;

use commands::common::LogLevelArg;
use commands::inspect::{self, InspectArgs};
use commands::merge::{self, MergeArgs};
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tilemosaic")]
#[command(version = tilemosaic::VERSION)]
#[command(about = "Download a mosaic and convert it to MBTiles or PMTiles format", long_about = None)]
struct Cli {
    /// Logging level; RUST_LOG overrides it
    #[arg(long, short = 'l', value_enum, global = true, default_value = "info")]
    log_level: LogLevelArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge every slice of a mosaic into one archive
    Merge(MergeArgs),
    /// Report zoom range, metadata and tile counts of tile sources
    Inspect(InspectArgs),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    init_logging(cli.log_level.into()).map_err(|e| CliError::Logging(e.to_string()))?;

    match cli.command {
        Commands::Merge(args) => merge::run(args),
        Commands::Inspect(args) => inspect::run(args),
    }
}
