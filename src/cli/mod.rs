//! `dirschema` command line
//!
//! Parses arguments, installs logging, runs one command and prints one JSON
//! object on stdout. A failed command also returns its error so the binary
//! exits non-zero.

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::run_command;
pub use errors::{CliError, CliResult};
pub use io::{write_error, write_response};

use crate::observability::init_logging;

pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    init_logging(!cli.plain_logs);

    match run_command(cli.command) {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), &e.to_string())?;
            Err(e)
        }
    }
}
