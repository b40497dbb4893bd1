//! Backup error types
//!
//! A failed backup never touches the schema directory, only the backup
//! directory, so none of these errors is fatal.

use std::fmt;
use std::io;
use std::path::Path;

use super::crypto::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupErrorCode {
    DsBackupInvalidId,
    DsBackupIo,
    DsBackupDescriptor,
    DsBackupDuplicateId,
    DsBackupNotFound,
    DsBackupCrypto,
}

impl BackupErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupErrorCode::DsBackupInvalidId => "DS_BACKUP_INVALID_ID",
            BackupErrorCode::DsBackupIo => "DS_BACKUP_IO",
            BackupErrorCode::DsBackupDescriptor => "DS_BACKUP_DESCRIPTOR",
            BackupErrorCode::DsBackupDuplicateId => "DS_BACKUP_DUPLICATE_ID",
            BackupErrorCode::DsBackupNotFound => "DS_BACKUP_NOT_FOUND",
            BackupErrorCode::DsBackupCrypto => "DS_BACKUP_CRYPTO",
        }
    }
}

#[derive(Debug)]
pub struct BackupError {
    code: BackupErrorCode,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl BackupError {
    fn new(code: BackupErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn invalid_id(id: &str) -> Self {
        Self::new(
            BackupErrorCode::DsBackupInvalidId,
            format!("backup ID '{}' must be a plain name without path separators or '..'", id),
        )
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(BackupErrorCode::DsBackupIo, message).with_source(source)
    }

    pub fn io_error_at_path(path: &Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn descriptor(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::DsBackupDescriptor, message)
    }

    pub fn duplicate_id(id: &str, backup_dir: &Path) -> Self {
        Self::new(
            BackupErrorCode::DsBackupDuplicateId,
            format!("backup ID '{}' already exists in {}", id, backup_dir.display()),
        )
    }

    pub fn not_found(id: &str, backup_dir: &Path) -> Self {
        Self::new(
            BackupErrorCode::DsBackupNotFound,
            format!("no backup '{}' in {}", id, backup_dir.display()),
        )
    }

    pub fn code(&self) -> BackupErrorCode {
        self.code
    }
}

impl From<CryptoError> for BackupError {
    fn from(err: CryptoError) -> Self {
        Self::new(BackupErrorCode::DsBackupCrypto, "cryptographic provider failure").with_source(err)
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)?;
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
