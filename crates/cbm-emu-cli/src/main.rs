mod config;
mod inspect;
mod run;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use cbm_emu_core::event::EventError;
use cbm_emu_core::resources::ResourceError;
use cbm_emu_core::snapshot::SnapshotError;
use cbm_emu_net::NetworkError;
use clap::{Parser, Subcommand};
use log::{error, info};
use thiserror::Error;

use crate::run::RunArgs;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Parser)]
#[command(name = "cbm-emu", version, about = "Headless CBM machine with event recording and netplay")]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the machine for a number of frames
    Run(RunArgs),
    /// Print the header, modules and events of a snapshot
    Inspect {
        /// Snapshot file
        file: PathBuf,
    },
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let result = match &args.command {
        Command::Run(run_args) => run::run(run_args).map(|summary| {
            info!(
                "Stopped after {} frames at clock {}",
                summary.frames, summary.clock
            );
            println!("{:?}", summary.registers);
        }),
        Command::Inspect { file } => inspect::inspect(file, &mut io::stdout().lock()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("cbm-emu: {e}");
            ExitCode::FAILURE
        }
    }
}
