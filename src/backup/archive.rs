//! Tar archive creation for schema backups
//!
//! - Standard tar format, no compression
//! - First entry is the backup comment, schema files follow in sorted order
//! - Digest / MAC cover each schema file name followed by its content
//! - fsync archive after creation

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tar::{Builder, Header};

use super::crypto::Digester;
use super::errors::{BackupError, BackupResult};
use crate::fault::{points, FaultInjector};
use crate::persistence::list_schema_files;

/// Name of the archive entry holding the human readable comment.
pub const COMMENT_ENTRY: &str = ".backup-comment";

pub const ARCHIVE_PREFIX: &str = "schema-backup-";

/// Running digest and MAC over archived schema files.
#[derive(Default)]
pub struct ArchiveHasher {
    digest: Option<Box<dyn Digester>>,
    mac: Option<Box<dyn Digester>>,
}

impl ArchiveHasher {
    pub fn new(digest: Option<Box<dyn Digester>>, mac: Option<Box<dyn Digester>>) -> Self {
        Self { digest, mac }
    }

    pub fn update_entry(&mut self, name: &str, content: &[u8]) {
        for d in [self.digest.as_mut(), self.mac.as_mut()].into_iter().flatten() {
            d.update(name.as_bytes());
            d.update(content);
        }
    }

    /// Returns `(digest, mac)`.
    pub fn finish(self) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        (
            self.digest.map(|d| d.finish()),
            self.mac.map(|m| m.finish()),
        )
    }
}

/// Unencrypted archive bytes and the schema files it holds.
pub struct ArchiveContents {
    pub bytes: Vec<u8>,
    pub files: Vec<String>,
}

fn tar_error(message: String, e: std::io::Error) -> BackupError {
    BackupError::io_error(message, e)
}

fn append(builder: &mut Builder<Vec<u8>>, name: &str, data: &[u8]) -> BackupResult<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    builder
        .append_data(&mut header, name, data)
        .map_err(|e| tar_error(format!("Failed to add {} to archive", name), e))
}

/// Packs `comment` and every schema file of `schema_dir` into a tar image.
pub fn build_archive(
    schema_dir: &Path,
    comment: &str,
    hasher: &mut ArchiveHasher,
) -> BackupResult<ArchiveContents> {
    let files =
        list_schema_files(schema_dir).map_err(|e| BackupError::io_error_at_path(schema_dir, e))?;

    let mut builder = Builder::new(Vec::new());
    append(&mut builder, COMMENT_ENTRY, comment.as_bytes())?;

    for name in &files {
        let path = schema_dir.join(name);
        let content = fs::read(&path).map_err(|e| BackupError::io_error_at_path(&path, e))?;
        hasher.update_entry(name, &content);
        append(&mut builder, name, &content)?;
    }

    let bytes = builder
        .into_inner()
        .map_err(|e| tar_error("Failed to finish archive".to_string(), e))?;

    Ok(ArchiveContents { bytes, files })
}

/// First unused `schema-backup-<id>[.N]` path in `backup_dir`.
pub fn archive_path(backup_dir: &Path, id: &str) -> PathBuf {
    let base = format!("{}{}", ARCHIVE_PREFIX, id);
    let mut candidate = backup_dir.join(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = backup_dir.join(format!("{}.{}", base, n));
        n += 1;
    }
    candidate
}

/// Writes and fsyncs the archive. A partial file is removed on failure.
pub fn write_archive(path: &Path, bytes: &[u8], faults: &FaultInjector) -> BackupResult<()> {
    let result = (|| {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        faults.check(points::BACKUP_WRITE_ARCHIVE)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok::<(), std::io::Error>(())
    })();

    if let Err(e) = result {
        cleanup_partial_archive(path);
        return Err(BackupError::io_error(
            format!("Failed to write archive: {}", path.display()),
            e,
        ));
    }
    Ok(())
}

pub fn cleanup_partial_archive(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::crypto::{DigestProvider, Sha256Provider};
    use std::io::Read;
    use tar::Archive;
    use tempfile::TempDir;

    fn schema_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("99-user.ldif"), "dn: cn=schema\n").unwrap();
        fs::write(dir.path().join("00-core.ldif"), "dn: cn=schema\n# core\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_comment_first_then_sorted_files() {
        let dir = schema_dir();
        let mut hasher = ArchiveHasher::default();
        let contents = build_archive(dir.path(), "Directory Server schema backup 1", &mut hasher).unwrap();

        let mut archive = Archive::new(&contents.bytes[..]);
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            if name == COMMENT_ENTRY {
                let mut text = String::new();
                entry.read_to_string(&mut text).unwrap();
                assert!(text.ends_with("backup 1"));
            }
            names.push(name);
        }
        assert_eq!(names, vec![COMMENT_ENTRY, "00-core.ldif", "99-user.ldif"]);
        assert_eq!(contents.files, vec!["00-core.ldif", "99-user.ldif"]);
    }

    #[test]
    fn test_digest_covers_names() {
        let dir = schema_dir();
        let mut first = ArchiveHasher::new(Some(Sha256Provider.digester()), None);
        build_archive(dir.path(), "c", &mut first).unwrap();

        fs::rename(dir.path().join("99-user.ldif"), dir.path().join("98-user.ldif")).unwrap();
        let mut second = ArchiveHasher::new(Some(Sha256Provider.digester()), None);
        build_archive(dir.path(), "c", &mut second).unwrap();

        assert_ne!(first.finish().0, second.finish().0);
    }

    #[test]
    fn test_archive_path_avoids_existing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("schema-backup-x"), "").unwrap();
        fs::write(dir.path().join("schema-backup-x.1"), "").unwrap();
        assert_eq!(
            archive_path(dir.path(), "x"),
            dir.path().join("schema-backup-x.2")
        );
    }

    #[test]
    fn test_write_fault_removes_partial_archive() {
        let dir = TempDir::new().unwrap();
        let faults = FaultInjector::new();
        faults.arm(points::BACKUP_WRITE_ARCHIVE);
        let path = dir.path().join("schema-backup-x");
        assert!(write_archive(&path, b"data", &faults).is_err());
        assert!(!path.exists());
    }
}
