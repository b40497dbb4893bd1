//! Schema backup
//!
//! A backup is a single tar archive holding a comment entry and a copy of
//! every schema file, described by a [`BackupDescriptor`] in the backup
//! directory.
//!
//! # Archive Format
//!
//! ```text
//! schema-backup-<id>
//! ├── .backup-comment      "<product> schema backup <id>"
//! ├── 00-core.ldif
//! └── 99-user.ldif
//! ```
//!
//! # Algorithm
//!
//! 1. Hold the schema write lock
//! 2. Reject a backup ID that is not a plain name or is already present in
//!    the backup directory
//! 3. Resolve the requested digest / MAC / cipher providers
//! 4. Pack the schema files, hashing name and content of each
//! 5. Encrypt the archive if requested
//! 6. Write and fsync the archive
//! 7. Record the descriptor in `backup.info`
//!
//! Backup is read-only with respect to the schema directory.

mod archive;
pub mod crypto;
mod descriptor;
mod errors;

pub use archive::{ArchiveHasher, ARCHIVE_PREFIX, COMMENT_ENTRY};
pub use crypto::{CryptoError, CryptoProviders};
pub use descriptor::{
    BackupDescriptor, BackupDirectory, BACKUP_INFO_FILE, PROP_ARCHIVE_FILE,
    PROP_CIPHER_ALGORITHM, PROP_DIGEST_ALGORITHM, PROP_MAC_ALGORITHM,
};
pub use errors::{BackupError, BackupErrorCode, BackupResult};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::fault::FaultInjector;
use crate::observability::Event;
use crate::schema::SchemaWriteGuard;

use archive::{archive_path, build_archive, cleanup_partial_archive, write_archive};

const BACKUP_ID_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// What to protect the archive with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Defaults to the current UTC time.
    pub id: Option<String>,
    pub hash: bool,
    /// Takes precedence over `hash`.
    pub sign: bool,
    pub encrypt: bool,
}

/// Preferred algorithm names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupAlgorithms {
    pub digest: String,
    pub mac: String,
    pub cipher: String,
}

impl Default for BackupAlgorithms {
    fn default() -> Self {
        Self {
            digest: crypto::SHA256.to_string(),
            mac: crypto::HMAC_SHA256.to_string(),
            cipher: crypto::AES_GCM.to_string(),
        }
    }
}

/// Creates and removes schema backups in one backup directory.
pub struct BackupManager {
    backup_dir: PathBuf,
    product_name: String,
    providers: Arc<CryptoProviders>,
    algorithms: BackupAlgorithms,
    faults: FaultInjector,
}

impl BackupManager {
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        product_name: impl Into<String>,
        providers: Arc<CryptoProviders>,
        algorithms: BackupAlgorithms,
        faults: FaultInjector,
    ) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            product_name: product_name.into(),
            providers,
            algorithms,
            faults,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn create_backup(
        &self,
        _guard: &SchemaWriteGuard<'_>,
        schema_dir: &Path,
        options: &BackupOptions,
    ) -> BackupResult<BackupDescriptor> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| Utc::now().format(BACKUP_ID_FORMAT).to_string());

        tracing::info!(
            event = Event::BackupBegin.as_str(),
            backup_id = %id,
            schema_dir = %schema_dir.display(),
            "schema backup started"
        );

        match self.write_backup(&id, schema_dir, options) {
            Ok(descriptor) => {
                tracing::info!(
                    event = Event::BackupComplete.as_str(),
                    backup_id = %id,
                    encrypted = descriptor.encrypted,
                    "schema backup complete"
                );
                Ok(descriptor)
            }
            Err(e) => {
                tracing::error!(
                    event = Event::BackupFailed.as_str(),
                    backup_id = %id,
                    error = %e,
                    "schema backup failed"
                );
                Err(e)
            }
        }
    }

    fn write_backup(
        &self,
        id: &str,
        schema_dir: &Path,
        options: &BackupOptions,
    ) -> BackupResult<BackupDescriptor> {
        validate_backup_id(id)?;
        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| BackupError::io_error_at_path(&self.backup_dir, e))?;

        let mut directory = BackupDirectory::open(&self.backup_dir)?;
        if directory.get(id).is_some() {
            return Err(BackupError::duplicate_id(id, &self.backup_dir));
        }

        let mac = if options.sign {
            Some(self.providers.mac(&self.algorithms.mac)?)
        } else {
            None
        };
        let digest = if options.hash && mac.is_none() {
            Some(self.providers.digest(&self.algorithms.digest)?)
        } else {
            None
        };
        let cipher = if options.encrypt {
            Some(self.providers.cipher(&self.algorithms.cipher)?)
        } else {
            None
        };

        let mut hasher = ArchiveHasher::new(
            digest.as_ref().map(|d| d.digester()),
            mac.as_ref().map(|m| m.signer()).transpose()?,
        );
        let comment = format!("{} schema backup {}", self.product_name, id);
        let contents = build_archive(schema_dir, &comment, &mut hasher)?;

        let bytes = match &cipher {
            Some(cipher) => cipher.encrypt(&contents.bytes)?,
            None => contents.bytes,
        };

        let path = archive_path(&self.backup_dir, id);
        write_archive(&path, &bytes, &self.faults)?;

        let archive_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut descriptor = BackupDescriptor::new(id, archive_file);
        let (unsigned, signed) = hasher.finish();
        if let (Some(hash), Some(provider)) = (unsigned, &digest) {
            descriptor.set_unsigned_hash(&hash);
            descriptor.set_property(PROP_DIGEST_ALGORITHM, provider.algorithm());
        }
        if let (Some(hash), Some(provider)) = (signed, &mac) {
            descriptor.set_signed_hash(&hash);
            descriptor.set_property(PROP_MAC_ALGORITHM, provider.algorithm());
        }
        if let Some(provider) = &cipher {
            descriptor.encrypted = true;
            descriptor.set_property(PROP_CIPHER_ALGORITHM, provider.algorithm());
        }

        directory.add(descriptor.clone())?;
        if let Err(e) = directory.save() {
            cleanup_partial_archive(&path);
            return Err(e);
        }

        tracing::debug!(
            backup_id = %id,
            archive = %path.display(),
            files = contents.files.len(),
            "schema backup archive written"
        );
        Ok(descriptor)
    }

    /// Deletes the archive and the descriptor of backup `id`.
    pub fn remove_backup(&self, _guard: &SchemaWriteGuard<'_>, id: &str) -> BackupResult<()> {
        let mut directory = BackupDirectory::open(&self.backup_dir)?;
        let descriptor = directory
            .remove(id)
            .ok_or_else(|| BackupError::not_found(id, &self.backup_dir))?;

        if let Some(file) = descriptor.archive_file() {
            let path = self.backup_dir.join(file);
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(BackupError::io_error_at_path(&path, e));
                }
                _ => {}
            }
        }
        directory.save()?;

        tracing::info!(
            event = Event::BackupRemoved.as_str(),
            backup_id = %id,
            "schema backup removed"
        );
        Ok(())
    }
}

/// A backup ID names the archive file and must be a single path component.
fn validate_backup_id(id: &str) -> BackupResult<()> {
    let plain = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains("..")
        && !id.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    if plain {
        Ok(())
    } else {
        Err(BackupError::invalid_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaWriteLock;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        schema_dir: PathBuf,
        manager: BackupManager,
    }

    fn fixture(providers: CryptoProviders) -> Fixture {
        let root = TempDir::new().unwrap();
        let schema_dir = root.path().join("schema");
        fs::create_dir(&schema_dir).unwrap();
        fs::write(schema_dir.join("99-user.ldif"), "dn: cn=schema\n").unwrap();
        let manager = BackupManager::new(
            root.path().join("backup"),
            "Directory Server",
            Arc::new(providers),
            BackupAlgorithms::default(),
            FaultInjector::new(),
        );
        Fixture {
            root,
            schema_dir,
            manager,
        }
    }

    #[test]
    fn test_backup_records_descriptor() {
        let f = fixture(CryptoProviders::standard(None, None).unwrap());
        let lock = SchemaWriteLock::new();
        let options = BackupOptions {
            id: Some("b1".into()),
            hash: true,
            ..Default::default()
        };

        let descriptor = f
            .manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap();

        assert_eq!(descriptor.archive_file(), Some("schema-backup-b1"));
        assert_eq!(descriptor.property(PROP_DIGEST_ALGORITHM), Some("SHA-256"));
        assert!(descriptor.unsigned_hash.is_some());
        assert!(f.root.path().join("backup/schema-backup-b1").exists());
        let directory = BackupDirectory::open(f.manager.backup_dir()).unwrap();
        assert_eq!(directory.get("b1"), Some(&descriptor));
    }

    #[test]
    fn test_mac_takes_precedence_over_digest() {
        let f = fixture(CryptoProviders::standard(Some(b"secret".to_vec()), None).unwrap());
        let lock = SchemaWriteLock::new();
        let options = BackupOptions {
            id: Some("b1".into()),
            hash: true,
            sign: true,
            ..Default::default()
        };

        let descriptor = f
            .manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap();

        assert!(descriptor.signed_hash.is_some());
        assert!(descriptor.unsigned_hash.is_none());
        assert_eq!(descriptor.property(PROP_MAC_ALGORITHM), Some("HmacSHA256"));
    }

    #[test]
    fn test_encrypt_without_key_fails_cleanly() {
        let f = fixture(CryptoProviders::standard(None, None).unwrap());
        let lock = SchemaWriteLock::new();
        let options = BackupOptions {
            id: Some("b1".into()),
            encrypt: true,
            ..Default::default()
        };

        let err = f
            .manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap_err();

        assert_eq!(err.code(), BackupErrorCode::DsBackupCrypto);
        assert!(!f.root.path().join("backup/schema-backup-b1").exists());
    }

    #[test]
    fn test_duplicate_backup_id() {
        let f = fixture(CryptoProviders::standard(None, None).unwrap());
        let lock = SchemaWriteLock::new();
        let options = BackupOptions {
            id: Some("b1".into()),
            ..Default::default()
        };
        f.manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap();
        let err = f
            .manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::DsBackupDuplicateId);
    }

    #[test]
    fn test_backup_id_with_path_components_rejected() {
        let f = fixture(CryptoProviders::standard(None, None).unwrap());
        let lock = SchemaWriteLock::new();

        for id in ["../outside", "nested/b1", "..", ".hidden", ""] {
            let options = BackupOptions {
                id: Some(id.into()),
                ..Default::default()
            };
            let err = f
                .manager
                .create_backup(&lock.acquire(), &f.schema_dir, &options)
                .unwrap_err();
            assert_eq!(err.code(), BackupErrorCode::DsBackupInvalidId, "{id}");
        }
        assert!(!f.manager.backup_dir().exists());
    }

    #[test]
    fn test_remove_backup() {
        let f = fixture(CryptoProviders::standard(None, None).unwrap());
        let lock = SchemaWriteLock::new();
        let options = BackupOptions {
            id: Some("b1".into()),
            ..Default::default()
        };
        f.manager
            .create_backup(&lock.acquire(), &f.schema_dir, &options)
            .unwrap();

        f.manager.remove_backup(&lock.acquire(), "b1").unwrap();

        assert!(!f.root.path().join("backup/schema-backup-b1").exists());
        assert!(BackupDirectory::open(f.manager.backup_dir())
            .unwrap()
            .get("b1")
            .is_none());
        assert_eq!(
            f.manager.remove_backup(&lock.acquire(), "b1").unwrap_err().code(),
            BackupErrorCode::DsBackupNotFound
        );
    }
}
