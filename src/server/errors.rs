//! Server-level errors
//!
//! Wraps the subsystem errors the server root can surface, keeping each
//! subsystem's own code.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backup::{BackupError, CryptoError};
use crate::config::ConfigError;
use crate::persistence::{ConcatError, LoadError};
use crate::restore::RestoreError;
use crate::schema::SchemaError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Startup or reload could not build a catalog from the schema files.
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Concat(#[from] ConcatError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error("Backup crypto setup failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("schema directory is in use by another process (lock file {})", .path.display())]
    Locked { path: PathBuf },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ServerError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        ServerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Config(e) => e.code(),
            ServerError::Load(e) => e.code(),
            ServerError::Concat(_) => "DS_SCHEMA_CONCAT",
            ServerError::Schema(e) => e.code().code(),
            ServerError::Backup(e) => e.code().as_str(),
            ServerError::Restore(e) => e.code().as_str(),
            ServerError::Crypto(_) => "DS_BACKUP_CRYPTO",
            ServerError::Locked { .. } => "DS_SERVER_LOCKED",
            ServerError::Io { .. } => "DS_SERVER_IO",
        }
    }

    /// Whether the server cannot keep serving after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            ServerError::Config(_) | ServerError::Load(_) => true,
            ServerError::Schema(e) => e.is_fatal(),
            ServerError::Restore(e) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_pass_through() {
        let err = ServerError::from(SchemaError::UnsupportedOperation("replace".into()));
        assert_eq!(err.code(), "DS_SCHEMA_UNSUPPORTED_OPERATION");
        assert!(!err.is_fatal());

        let err = ServerError::from(BackupError::not_found("b1", Path::new("/bak")));
        assert_eq!(err.code(), "DS_BACKUP_NOT_FOUND");
    }
}
