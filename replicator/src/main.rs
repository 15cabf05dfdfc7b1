//! Replicator binary.
//!
//! Parses the command line, sets up tracing and runs the replication pipeline until every table
//! stopped or Ctrl+C was pressed. The exit code tells operator errors (1) from runtime faults (2)
//! and invalid arguments (3).

use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use telemetry::init_tracing;

use crate::cli::Args;
use crate::core::{load_replicator_config, start_replicator};
use crate::error::{ReplicatorError, ReplicatorResult};

mod cli;
mod core;
mod error;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }

            let _ = err.print();
            return ExitCode::from(ReplicatorError::from(err).exit_code());
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: Args) -> ReplicatorResult<()> {
    let config = load_replicator_config(&args)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(ReplicatorError::config)?;

    // Both rustls and sqlx bring a crypto provider, pin the process-wide one.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_replicator(config))
}
