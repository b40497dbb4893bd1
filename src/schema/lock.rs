//! Schema writer locks
//!
//! All schema mutations (modify, backup, restore, reload) run while holding
//! the single [`SchemaWriteLock`]. Operations that must only run under the
//! lock take a `&SchemaWriteGuard` parameter as proof. Readers never take
//! this lock; they read the published snapshot.
//!
//! [`SchemaWriteLock`] only excludes writers inside one process. A server
//! also holds a [`DirectoryLock`], an advisory lock on a file next to the
//! schema directory, for its whole lifetime, so a second process opening
//! the same directory is refused instead of interleaving file writes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};

/// Exclusive writer lock.
#[derive(Debug, Default)]
pub struct SchemaWriteLock {
    inner: Mutex<()>,
}

/// Proof that the schema writer lock is held. Released on drop.
pub struct SchemaWriteGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl SchemaWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is available.
    pub fn acquire(&self) -> SchemaWriteGuard<'_> {
        SchemaWriteGuard {
            _guard: self.inner.lock(),
        }
    }

    /// Returns `None` if another writer holds the lock.
    pub fn try_acquire(&self) -> Option<SchemaWriteGuard<'_>> {
        self.inner
            .try_lock()
            .map(|guard| SchemaWriteGuard { _guard: guard })
    }
}

/// Exclusive advisory lock on `<schema_dir>.lock`. Released when dropped.
#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
    _file: File,
}

impl DirectoryLock {
    /// Lock file guarding `schema_dir`.
    pub fn path_for(schema_dir: &Path) -> PathBuf {
        let mut name = schema_dir.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        schema_dir.with_file_name(name)
    }

    /// Returns `Ok(None)` if another holder has the lock.
    pub fn try_acquire(schema_dir: &Path) -> io::Result<Option<Self>> {
        let path = Self::path_for(schema_dir);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { path, _file: file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
