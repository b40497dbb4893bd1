//! CLI-specific error types
//!
//! Command failures keep the code of the subsystem that raised them.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::persistence::ConcatError;
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No concatenated snapshot; `init` was never run
    #[error("{0}. Run 'dirschema init' first.")]
    NotInitialized(ConcatError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure reported by the schema server
    #[error(transparent)]
    Command(ServerError),
}

impl CliError {
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "DS_CLI_CONFIG_ERROR",
            CliError::NotInitialized(_) => "DS_CLI_NOT_INITIALIZED",
            CliError::Io(_) | CliError::Json(_) => "DS_CLI_IO_ERROR",
            CliError::Command(e) => e.code(),
        }
    }
}

impl From<ServerError> for CliError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::Config(e) => Self::Config(e),
            ServerError::Concat(e @ ConcatError::Missing { .. }) => Self::NotInitialized(e),
            other => Self::Command(other),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ElementKind, SchemaError};
    use std::path::PathBuf;

    #[test]
    fn test_server_code_kept() {
        let err = CliError::from(ServerError::from(SchemaError::NotFound {
            kind: ElementKind::AttributeType,
            name: "nick".into(),
        }));
        assert_eq!(err.code_str(), "DS_SCHEMA_NOT_FOUND");
    }

    #[test]
    fn test_missing_snapshot_suggests_init() {
        let err = CliError::from(ServerError::from(ConcatError::Missing {
            dir: PathBuf::from("/srv/upgrade"),
            timestamped: "schema.ldif.<timestamp>".into(),
            base: "schema.ldif.base".into(),
        }));
        assert_eq!(err.code_str(), "DS_CLI_NOT_INITIALIZED");
        assert!(err.to_string().contains("dirschema init"));
    }
}
