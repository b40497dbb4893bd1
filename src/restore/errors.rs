//! Restore error types
//!
//! Errors raised before the live schema directory is moved aside are ERROR
//! severity: nothing was touched. Once the directory has been moved, the
//! error also reports whether the original directory was put back. When it
//! was not, the error is FATAL and an operator must reconcile by hand.

use std::fmt;
use std::io;
use std::path::Path;

use crate::backup::{BackupError, CryptoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Restore failed, schema directory intact
    Error,
    /// Schema directory could not be put back
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreErrorCode {
    DsRestoreFailed,
    DsRestoreIo,
    DsRestoreNotFound,
    DsRestoreInvalidBackup,
    DsRestoreUnknownAlgorithm,
    /// Recomputed digest or MAC does not match the descriptor
    DsRestoreArchiveIntegrity,
}

impl RestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreErrorCode::DsRestoreFailed => "DS_RESTORE_FAILED",
            RestoreErrorCode::DsRestoreIo => "DS_RESTORE_IO",
            RestoreErrorCode::DsRestoreNotFound => "DS_RESTORE_NOT_FOUND",
            RestoreErrorCode::DsRestoreInvalidBackup => "DS_RESTORE_INVALID_BACKUP",
            RestoreErrorCode::DsRestoreUnknownAlgorithm => "DS_RESTORE_UNKNOWN_ALGORITHM",
            RestoreErrorCode::DsRestoreArchiveIntegrity => "DS_RESTORE_ARCHIVE_INTEGRITY",
        }
    }
}

impl fmt::Display for RestoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Restore error with full context
#[derive(Debug)]
pub struct RestoreError {
    code: RestoreErrorCode,
    message: String,
    /// `Some` once the live directory was moved aside
    original_restored: Option<bool>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl RestoreError {
    fn new(
        code: RestoreErrorCode,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            original_restored: None,
            source,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(RestoreErrorCode::DsRestoreFailed, message, None)
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(RestoreErrorCode::DsRestoreIo, message, Some(Box::new(source)))
    }

    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn not_found(id: &str, backup_dir: &Path) -> Self {
        Self::new(
            RestoreErrorCode::DsRestoreNotFound,
            format!("no backup '{}' in {}", id, backup_dir.display()),
            None,
        )
    }

    pub fn invalid_backup(message: impl Into<String>) -> Self {
        Self::new(RestoreErrorCode::DsRestoreInvalidBackup, message, None)
    }

    pub fn archive_integrity(message: impl Into<String>) -> Self {
        Self::new(RestoreErrorCode::DsRestoreArchiveIntegrity, message, None)
    }

    /// Records whether the preserved schema directory was put back.
    pub fn with_original_restored(mut self, restored: bool) -> Self {
        self.original_restored = Some(restored);
        self
    }

    pub fn code(&self) -> RestoreErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn original_restored(&self) -> Option<bool> {
        self.original_restored
    }

    pub fn severity(&self) -> Severity {
        if self.original_restored == Some(false) {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<BackupError> for RestoreError {
    fn from(err: BackupError) -> Self {
        Self::new(
            RestoreErrorCode::DsRestoreInvalidBackup,
            "backup descriptor could not be read",
            Some(Box::new(err)),
        )
    }
}

impl From<CryptoError> for RestoreError {
    fn from(err: CryptoError) -> Self {
        let code = match err {
            CryptoError::UnknownAlgorithm(_) => RestoreErrorCode::DsRestoreUnknownAlgorithm,
            CryptoError::Decrypt { .. } => RestoreErrorCode::DsRestoreArchiveIntegrity,
            _ => RestoreErrorCode::DsRestoreFailed,
        };
        Self::new(code, "cryptographic provider failure", Some(Box::new(err)))
    }
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        match self.original_restored {
            Some(true) => write!(f, "; original schema directory restored")?,
            Some(false) => write!(f, "; original schema directory NOT restored")?,
            None => {}
        }
        Ok(())
    }
}

impl std::error::Error for RestoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type RestoreResult<T> = Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_directory_is_error_severity() {
        let err = RestoreError::not_found("b1", Path::new("/srv/backup"));
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(err.original_restored(), None);
        assert!(err.to_string().contains("DS_RESTORE_NOT_FOUND"));
    }

    #[test]
    fn test_failed_put_back_is_fatal() {
        let err = RestoreError::archive_integrity("digest mismatch").with_original_restored(false);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("NOT restored"));

        let err = RestoreError::archive_integrity("digest mismatch").with_original_restored(true);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("original schema directory restored"));
    }

    #[test]
    fn test_unknown_algorithm_code() {
        let err: RestoreError = CryptoError::UnknownAlgorithm("MD5".into()).into();
        assert_eq!(err.code(), RestoreErrorCode::DsRestoreUnknownAlgorithm);
    }

    #[test]
    fn test_io_error_source() {
        let err = RestoreError::io_error("read failed", io::Error::new(io::ErrorKind::Other, "eio"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("eio"));
    }
}
