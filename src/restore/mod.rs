//! Schema restore and verification
//!
//! # Algorithm
//!
//! 1. Find the backup descriptor and read the archive
//! 2. Resolve the digest / MAC / cipher named by the descriptor
//! 3. Decrypt the archive if it is encrypted
//! 4. Move the live schema directory to `<schema_dir>.save[N]`
//! 5. Stream entries into a fresh schema directory, hashing each file
//! 6. Compare the recomputed digest / MAC with the descriptor
//! 7. Remove the saved directory
//!
//! Steps 1-3 fail without touching the schema directory. A failure in steps
//! 5-6 deletes the fresh directory and renames the saved one back; the error
//! reports whether that worked.
//!
//! In verify-only mode steps 4, 5 (writing) and 7 are skipped.

mod errors;
mod extractor;

pub use errors::{RestoreError, RestoreErrorCode, RestoreResult, Severity};

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use crate::backup::crypto::digests_match;
use crate::backup::{
    ArchiveHasher, BackupDescriptor, BackupDirectory, CryptoProviders, PROP_CIPHER_ALGORITHM,
    PROP_DIGEST_ALGORITHM, PROP_MAC_ALGORITHM,
};
use crate::fault::FaultInjector;
use crate::observability::{Alert, AlertKind, AlertNotifier, Event};
use crate::schema::SchemaWriteGuard;

use extractor::{for_each_entry, put_back, save_path, sync_parent, write_entry};

/// Outcome of a successful restore or verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: String,
    pub verify_only: bool,
    pub comment: Option<String>,
    pub files: Vec<String>,
}

pub struct RestoreManager {
    providers: Arc<CryptoProviders>,
    faults: FaultInjector,
    alerts: Arc<dyn AlertNotifier>,
}

impl RestoreManager {
    pub fn new(
        providers: Arc<CryptoProviders>,
        faults: FaultInjector,
        alerts: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            providers,
            faults,
            alerts,
        }
    }

    /// Restores backup `backup_id` from `backup_dir` into `schema_dir`, or
    /// only checks its integrity when `verify_only` is set.
    pub fn restore_or_verify(
        &self,
        _guard: &SchemaWriteGuard<'_>,
        backup_dir: &Path,
        backup_id: &str,
        schema_dir: &Path,
        verify_only: bool,
    ) -> RestoreResult<RestoreReport> {
        tracing::info!(
            event = Event::RestoreBegin.as_str(),
            backup_id = %backup_id,
            verify_only,
            "schema restore started"
        );

        let result = self.run(backup_dir, backup_id, schema_dir, verify_only);
        match &result {
            Ok(report) if verify_only => tracing::info!(
                event = Event::VerifyComplete.as_str(),
                backup_id = %backup_id,
                files = report.files.len(),
                "schema backup verified"
            ),
            Ok(report) => tracing::info!(
                event = Event::RestoreComplete.as_str(),
                backup_id = %backup_id,
                files = report.files.len(),
                "schema directory restored"
            ),
            Err(e) => tracing::error!(
                event = Event::RestoreFailed.as_str(),
                backup_id = %backup_id,
                verify_only,
                error = %e,
                "schema restore failed"
            ),
        }
        result
    }

    fn run(
        &self,
        backup_dir: &Path,
        backup_id: &str,
        schema_dir: &Path,
        verify_only: bool,
    ) -> RestoreResult<RestoreReport> {
        let directory = BackupDirectory::open(backup_dir)?;
        let descriptor = directory
            .get(backup_id)
            .ok_or_else(|| RestoreError::not_found(backup_id, backup_dir))?;

        let archive_file = descriptor.archive_file().ok_or_else(|| {
            RestoreError::invalid_backup(format!("backup '{}' names no archive file", backup_id))
        })?;
        let archive_path = backup_dir.join(archive_file);
        let raw = fs::read(&archive_path).map_err(|e| {
            RestoreError::io_error(
                format!("Failed to open backup archive: {}", archive_path.display()),
                e,
            )
        })?;

        let mut hasher = self.hasher_for(descriptor)?;
        let bytes = if descriptor.encrypted {
            let algorithm = descriptor.property(PROP_CIPHER_ALGORITHM).ok_or_else(|| {
                RestoreError::invalid_backup(format!(
                    "encrypted backup '{}' names no cipher",
                    backup_id
                ))
            })?;
            self.providers.cipher(algorithm)?.decrypt(&raw)?
        } else {
            raw
        };

        if verify_only {
            let mut files = Vec::new();
            let comment = for_each_entry(&bytes, |name, content| {
                hasher.update_entry(name, content);
                files.push(name.to_string());
                Ok(())
            })?;
            check_hashes(descriptor, hasher)?;
            return Ok(RestoreReport {
                backup_id: backup_id.to_string(),
                verify_only,
                comment,
                files,
            });
        }

        let saved = save_path(schema_dir)?;
        fs::rename(schema_dir, &saved).map_err(|e| {
            RestoreError::io_error(
                format!(
                    "Failed to move {} to {}",
                    schema_dir.display(),
                    saved.display()
                ),
                e,
            )
        })?;

        match self.materialize(&bytes, schema_dir, descriptor, hasher) {
            Ok((comment, files)) => {
                if let Err(e) = fs::remove_dir_all(&saved) {
                    tracing::warn!(
                        path = %saved.display(),
                        error = %e,
                        "could not remove saved schema directory"
                    );
                }
                Ok(RestoreReport {
                    backup_id: backup_id.to_string(),
                    verify_only,
                    comment,
                    files,
                })
            }
            Err(e) => match put_back(schema_dir, &saved) {
                Ok(()) => Err(e.with_original_restored(true)),
                Err(put_back_error) => {
                    self.alerts.notify(Alert::new(
                        AlertKind::SchemaDirectoryNotRestored,
                        format!(
                            "restore of backup '{}' failed ({}) and the original schema directory could not be put back from {}: {}",
                            backup_id,
                            e.message(),
                            saved.display(),
                            put_back_error
                        ),
                    ));
                    Err(e.with_original_restored(false))
                }
            },
        }
    }

    /// A stored hash without the algorithm that produced it cannot be
    /// checked and fails verification.
    fn hasher_for(&self, descriptor: &BackupDescriptor) -> RestoreResult<ArchiveHasher> {
        let digest = match (&descriptor.unsigned_hash, descriptor.property(PROP_DIGEST_ALGORITHM)) {
            (Some(_), Some(algorithm)) => Some(self.providers.digest(algorithm)?.digester()),
            (Some(_), None) => return Err(missing_algorithm(descriptor, "digest")),
            (None, _) => None,
        };
        let mac = match (&descriptor.signed_hash, descriptor.property(PROP_MAC_ALGORITHM)) {
            (Some(_), Some(algorithm)) => Some(self.providers.mac(algorithm)?.signer()?),
            (Some(_), None) => return Err(missing_algorithm(descriptor, "MAC")),
            (None, _) => None,
        };
        if descriptor.encrypted {
            if let Some(algorithm) = descriptor.property(PROP_CIPHER_ALGORITHM) {
                self.providers.cipher(algorithm)?;
            }
        }
        Ok(ArchiveHasher::new(digest, mac))
    }

    fn materialize(
        &self,
        bytes: &[u8],
        schema_dir: &Path,
        descriptor: &BackupDescriptor,
        mut hasher: ArchiveHasher,
    ) -> RestoreResult<(Option<String>, Vec<String>)> {
        fs::create_dir(schema_dir).map_err(|e| RestoreError::io_error_at_path(schema_dir, e))?;

        let mut files = Vec::new();
        let comment = for_each_entry(bytes, |name, content| {
            hasher.update_entry(name, content);
            write_entry(schema_dir, name, content, &self.faults)
                .map_err(|e| RestoreError::io_error_at_path(&schema_dir.join(name), e))?;
            files.push(name.to_string());
            Ok(())
        })?;

        check_hashes(descriptor, hasher)?;

        File::open(schema_dir)
            .and_then(|d| d.sync_all())
            .and_then(|_| sync_parent(schema_dir))
            .map_err(|e| RestoreError::io_error_at_path(schema_dir, e))?;

        Ok((comment, files))
    }
}

fn missing_algorithm(descriptor: &BackupDescriptor, what: &str) -> RestoreError {
    RestoreError::archive_integrity(format!(
        "backup '{}' carries a {} hash but names no {} algorithm",
        descriptor.id, what, what
    ))
}

fn check_hashes(descriptor: &BackupDescriptor, hasher: ArchiveHasher) -> RestoreResult<()> {
    let (digest, mac) = hasher.finish();

    if let (Some(expected), Some(actual)) = (descriptor.unsigned_hash_bytes()?, digest) {
        if !digests_match(&expected, &actual) {
            return Err(RestoreError::archive_integrity(format!(
                "digest of backup '{}' does not match the archived files",
                descriptor.id
            )));
        }
    }
    if let (Some(expected), Some(actual)) = (descriptor.signed_hash_bytes()?, mac) {
        if !digests_match(&expected, &actual) {
            return Err(RestoreError::archive_integrity(format!(
                "signed hash of backup '{}' does not match the archived files",
                descriptor.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{BackupAlgorithms, BackupManager, BackupOptions};
    use crate::fault::points;
    use crate::observability::MemoryAlertNotifier;
    use crate::schema::SchemaWriteLock;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        schema_dir: PathBuf,
        backup_dir: PathBuf,
        faults: FaultInjector,
        alerts: MemoryAlertNotifier,
        restore: RestoreManager,
    }

    fn fixture(options: BackupOptions) -> Fixture {
        let root = TempDir::new().unwrap();
        let schema_dir = root.path().join("schema");
        let backup_dir = root.path().join("backup");
        fs::create_dir(&schema_dir).unwrap();
        fs::write(schema_dir.join("00-core.ldif"), "dn: cn=schema\n# core\n").unwrap();
        fs::write(schema_dir.join("99-user.ldif"), "dn: cn=schema\n").unwrap();

        let providers =
            Arc::new(CryptoProviders::standard(Some(b"mac-key".to_vec()), Some(vec![3u8; 32])).unwrap());
        let faults = FaultInjector::new();
        let lock = SchemaWriteLock::new();
        BackupManager::new(
            &backup_dir,
            "Directory Server",
            providers.clone(),
            BackupAlgorithms::default(),
            faults.clone(),
        )
        .create_backup(&lock.acquire(), &schema_dir, &options)
        .unwrap();

        let alerts = MemoryAlertNotifier::new();
        let restore = RestoreManager::new(providers, faults.clone(), Arc::new(alerts.clone()));
        Fixture {
            _root: root,
            schema_dir,
            backup_dir,
            faults,
            alerts,
            restore,
        }
    }

    fn options() -> BackupOptions {
        BackupOptions {
            id: Some("b1".into()),
            hash: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_verify_only_reports_files_and_comment() {
        let f = fixture(options());
        let lock = SchemaWriteLock::new();
        let report = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, true)
            .unwrap();
        assert_eq!(report.files, vec!["00-core.ldif", "99-user.ldif"]);
        assert_eq!(report.comment.as_deref(), Some("Directory Server schema backup b1"));
    }

    #[test]
    fn test_encrypted_signed_restore() {
        let f = fixture(BackupOptions {
            id: Some("b1".into()),
            sign: true,
            encrypt: true,
            ..Default::default()
        });
        fs::write(f.schema_dir.join("99-user.ldif"), "changed").unwrap();
        let lock = SchemaWriteLock::new();

        f.restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, false)
            .unwrap();

        assert_eq!(
            fs::read_to_string(f.schema_dir.join("99-user.ldif")).unwrap(),
            "dn: cn=schema\n"
        );
        assert!(!f.schema_dir.with_file_name("schema.save").exists());
    }

    #[test]
    fn test_tampered_archive_fails_integrity_and_keeps_directory() {
        let f = fixture(options());
        let archive = f.backup_dir.join("schema-backup-b1");
        let bytes = fs::read(&archive).unwrap();
        let text = String::from_utf8_lossy(&bytes).replace("# core", "# CORE");
        fs::write(&archive, text.as_bytes()).unwrap();
        fs::write(f.schema_dir.join("99-user.ldif"), "live").unwrap();
        let lock = SchemaWriteLock::new();

        let err = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, false)
            .unwrap_err();

        assert_eq!(err.code(), RestoreErrorCode::DsRestoreArchiveIntegrity);
        assert_eq!(err.original_restored(), Some(true));
        assert_eq!(fs::read_to_string(f.schema_dir.join("99-user.ldif")).unwrap(), "live");
    }

    #[test]
    fn test_write_fault_puts_original_back() {
        let f = fixture(options());
        f.faults.arm(points::RESTORE_WRITE_FILE);
        let lock = SchemaWriteLock::new();

        let err = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, false)
            .unwrap_err();

        assert_eq!(err.original_restored(), Some(true));
        assert!(f.schema_dir.join("00-core.ldif").exists());
        assert!(f.alerts.alerts().is_empty());
    }

    #[test]
    fn test_unknown_algorithm_fails_before_touching_directory() {
        let f = fixture(options());
        let mut directory = BackupDirectory::open(&f.backup_dir).unwrap();
        let mut descriptor = directory.remove("b1").unwrap();
        descriptor.set_property(PROP_DIGEST_ALGORITHM, "MD2");
        directory.add(descriptor).unwrap();
        directory.save().unwrap();
        let lock = SchemaWriteLock::new();

        let err = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, false)
            .unwrap_err();

        assert_eq!(err.code(), RestoreErrorCode::DsRestoreUnknownAlgorithm);
        assert_eq!(err.original_restored(), None);
        assert!(!f.schema_dir.with_file_name("schema.save").exists());
    }

    #[test]
    fn test_hash_without_algorithm_fails_verification() {
        let f = fixture(options());
        let mut directory = BackupDirectory::open(&f.backup_dir).unwrap();
        let mut descriptor = directory.remove("b1").unwrap();
        descriptor.properties.remove(PROP_DIGEST_ALGORITHM);
        assert!(descriptor.unsigned_hash.is_some());
        directory.add(descriptor).unwrap();
        directory.save().unwrap();
        let lock = SchemaWriteLock::new();

        let err = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "b1", &f.schema_dir, true)
            .unwrap_err();

        assert_eq!(err.code(), RestoreErrorCode::DsRestoreArchiveIntegrity);
        assert!(!f.schema_dir.with_file_name("schema.save").exists());
    }

    #[test]
    fn test_missing_backup() {
        let f = fixture(options());
        let lock = SchemaWriteLock::new();
        let err = f
            .restore
            .restore_or_verify(&lock.acquire(), &f.backup_dir, "nope", &f.schema_dir, true)
            .unwrap_err();
        assert_eq!(err.code(), RestoreErrorCode::DsRestoreNotFound);
    }
}
