//! dirschema CLI entry point
//!
//! Everything happens in [`dirschema::cli::run`]; this only turns a failure
//! into a non-zero exit status.

use dirschema::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}: {}", e.code_str(), e);
        std::process::exit(1);
    }
}
