//! locctl - command-line driver for the location client.
//!
//! Runs tracking, batching and geofence sessions against a simulated
//! positioning service and prints what the client callbacks receive.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::batch::BatchArgs;
use commands::common::Printer;
use commands::geofence::GeofenceArgs;
use commands::track::TrackArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "locctl")]
#[command(version = location_client::VERSION)]
#[command(about = "Drive location sessions and geofences against a simulated positioning service")]
struct Cli {
    /// Hub configuration file (INI). Defaults to <config dir>/locctl/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print one JSON object per line instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tracking session and print its reports
    Track(TrackArgs),

    /// Run a routine or trip batching session
    Batch(BatchArgs),

    /// Register geofences around the origin and print breaches
    Geofence(GeofenceArgs),

    /// Print the service capabilities and GNSS energy use
    Caps,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(cli.config.as_deref())?;
    let printer = Printer::new(cli.json);

    match cli.command {
        Commands::Track(args) => commands::track::run(&runner, printer, args),
        Commands::Batch(args) => commands::batch::run(&runner, printer, args),
        Commands::Geofence(args) => commands::geofence::run(&runner, printer, args),
        Commands::Caps => commands::caps::run(&runner, printer),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
