//! JSON output for the CLI
//!
//! Every command prints exactly one JSON object on stdout:
//!
//! ```json
//! {"status": "ok", "data": {...}}
//! {"status": "error", "code": "DS_SCHEMA_CONFLICT", "message": "..."}
//! ```

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

pub fn write_response(data: Value) -> CliResult<()> {
    write_json(&serde_json::json!({
        "status": "ok",
        "data": data
    }))
}

pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    write_json(&serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    }))
}

fn write_json(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
