//! Persistence error types
//!
//! A failed schema file update is reported with the state the files were
//! left in:
//!
//! - CLEANED: nothing was written, no restore needed
//! - RESTORED: original files put back, change not durable
//! - NOT_RESTORED: files inconsistent, operator must reconcile by hand
//!
//! Load errors are always fatal: the server does not start on a schema
//! directory it cannot fully validate.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::schema::SchemaError;

/// State the schema files were left in after a failed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Cleaned,
    Restored,
    NotRestored,
}

impl PersistOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistOutcome::Cleaned => "CLEANED",
            PersistOutcome::Restored => "RESTORED",
            PersistOutcome::NotRestored => "NOT_RESTORED",
        }
    }
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema file update failure with full context
#[derive(Debug)]
pub struct PersistenceError {
    outcome: PersistOutcome,
    message: String,
    /// Staging directory kept for manual recovery
    staging_dir: Option<PathBuf>,
    source: Option<io::Error>,
}

impl PersistenceError {
    fn new(
        outcome: PersistOutcome,
        message: impl Into<String>,
        staging_dir: Option<PathBuf>,
        source: Option<io::Error>,
    ) -> Self {
        Self {
            outcome,
            message: message.into(),
            staging_dir,
            source,
        }
    }

    pub fn cleaned(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(PersistOutcome::Cleaned, message, None, Some(source))
    }

    pub fn restored(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(PersistOutcome::Restored, message, None, Some(source))
    }

    pub fn not_restored(message: impl Into<String>, staging_dir: &Path, source: io::Error) -> Self {
        Self::new(
            PersistOutcome::NotRestored,
            message,
            Some(staging_dir.to_path_buf()),
            Some(source),
        )
    }

    pub fn outcome(&self) -> PersistOutcome {
        self.outcome
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    pub fn code(&self) -> &'static str {
        "DS_SCHEMA_PERSISTENCE"
    }

    /// Files left inconsistent need an operator.
    pub fn is_fatal(&self) -> bool {
        self.outcome == PersistOutcome::NotRestored
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.code(), self.outcome, self.message)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        if let Some(ref dir) = self.staging_dir {
            write!(f, " (original files kept in {})", dir.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Concatenated snapshot errors
#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("Concatenated schema I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "No concatenated schema snapshot found in {}: expected '{timestamped}' or '{base}'",
        .dir.display()
    )]
    Missing {
        dir: PathBuf,
        timestamped: String,
        base: String,
    },
}

impl ConcatError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        ConcatError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Schema directory load errors (always FATAL)
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot read schema files at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid definition in {file} at line {line}: {source}")]
    Definition {
        file: String,
        line: usize,
        #[source]
        source: SchemaError,
    },

    #[error("Schema element '{element}' in {file} is invalid: {source}")]
    Element {
        file: String,
        element: String,
        #[source]
        source: SchemaError,
    },

    #[error(transparent)]
    Concat(#[from] ConcatError),
}

impl LoadError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        LoadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "DS_SCHEMA_LOAD_IO",
            LoadError::Definition { .. } => "DS_SCHEMA_LOAD_DEFINITION",
            LoadError::Element { .. } => "DS_SCHEMA_LOAD_ELEMENT",
            LoadError::Concat(_) => "DS_SCHEMA_LOAD_CONCAT",
        }
    }

    /// Schema file the error refers to, if any.
    pub fn file(&self) -> Option<&str> {
        match self {
            LoadError::Definition { file, .. } | LoadError::Element { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        let err = PersistenceError::restored(
            "failed to write 99-user.ldif",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.outcome(), PersistOutcome::Restored);
        let text = err.to_string();
        assert!(text.contains("RESTORED"));
        assert!(text.contains("disk full"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_not_restored_keeps_staging_dir() {
        let err = PersistenceError::not_restored(
            "restore failed",
            Path::new("/tmp/schema.staging-1"),
            io::Error::new(io::ErrorKind::Other, "io"),
        );
        assert!(err.is_fatal());
        assert_eq!(err.staging_dir(), Some(Path::new("/tmp/schema.staging-1")));
        assert!(err.to_string().contains("schema.staging-1"));
    }

    #[test]
    fn test_missing_concat_names_both_files() {
        let err = ConcatError::Missing {
            dir: PathBuf::from("/srv/upgrade"),
            timestamped: "schema.ldif.<timestamp>".into(),
            base: "schema.ldif.base".into(),
        };
        let text = err.to_string();
        assert!(text.contains("/srv/upgrade"));
        assert!(text.contains("schema.ldif.base"));
        assert!(text.contains("schema.ldif.<timestamp>"));
    }
}
