//! Crash-safe schema file updates
//!
//! An update walks an explicit state machine:
//!
//! ```text
//! UNCHANGED -> SNAPSHOT_TAKEN -> WRITTEN -> COMMITTED
//!                    |              |
//!                    +--------------+--> RESTORE_OK | RESTORE_FAILED
//! ```
//!
//! 1. Copy every current schema file to a sibling staging directory.
//!    Failure leaves the files untouched (CLEANED).
//! 2. Write the new content of each touched file to `<file>.tmp`, sync it,
//!    rename it over the original, then sync the directory.
//! 3. On success discard the staging directory. On failure copy the staged
//!    originals back and delete files that did not exist before. If that
//!    works the error is RESTORED, otherwise NOT_RESTORED, an operator alert
//!    is raised and the staging directory is kept for manual recovery.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use super::errors::PersistenceError;
use super::files::{copy_synced, list_schema_files, render_schema_file, sync_dir, temp_path};
use crate::fault::{points, FaultInjector};
use crate::observability::{Alert, AlertKind, AlertNotifier, Event};
use crate::schema::{SchemaSnapshot, SchemaWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistState {
    Unchanged,
    SnapshotTaken,
    Written,
    Committed,
    RestoreOk,
    RestoreFailed,
}

impl PersistState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistState::Unchanged => "UNCHANGED",
            PersistState::SnapshotTaken => "SNAPSHOT_TAKEN",
            PersistState::Written => "WRITTEN",
            PersistState::Committed => "COMMITTED",
            PersistState::RestoreOk => "RESTORE_OK",
            PersistState::RestoreFailed => "RESTORE_FAILED",
        }
    }
}

impl fmt::Display for PersistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub state: PersistState,
    pub files_written: Vec<String>,
}

/// Writes catalog changes to the schema directory.
pub struct FilePersistenceCoordinator {
    schema_dir: PathBuf,
    faults: FaultInjector,
    alerts: Arc<dyn AlertNotifier>,
}

impl FilePersistenceCoordinator {
    pub fn new(
        schema_dir: impl Into<PathBuf>,
        faults: FaultInjector,
        alerts: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            faults,
            alerts,
        }
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Rewrites `files` from `snapshot`.
    pub fn persist(
        &self,
        _guard: &SchemaWriteGuard<'_>,
        snapshot: &SchemaSnapshot,
        files: &BTreeSet<String>,
    ) -> Result<PersistReport, PersistenceError> {
        if files.is_empty() {
            return Ok(PersistReport {
                state: PersistState::Unchanged,
                files_written: Vec::new(),
            });
        }

        tracing::info!(
            event = Event::PersistBegin.as_str(),
            files = ?files,
            "persisting schema files"
        );

        let mut run = PersistRun::new(self);

        if let Err(e) = run.take_snapshot() {
            run.discard_staging();
            tracing::error!(
                event = Event::PersistFailed.as_str(),
                state = run.state.as_str(),
                error = %e,
                "schema file snapshot failed; no file was modified"
            );
            return Err(PersistenceError::cleaned(
                "failed to copy schema files to the staging area",
                e,
            ));
        }

        match run.write(snapshot, files) {
            Ok(()) => {
                run.commit();
                Ok(PersistReport {
                    state: run.state,
                    files_written: files.iter().cloned().collect(),
                })
            }
            Err(cause) => Err(run.recover(files, cause)),
        }
    }
}

/// One pass through the update state machine.
struct PersistRun<'a> {
    coordinator: &'a FilePersistenceCoordinator,
    state: PersistState,
    staging: PathBuf,
    /// Files copied into the staging directory.
    staged: Vec<String>,
    /// Touched files that did not exist before the update.
    created: Vec<String>,
}

impl<'a> PersistRun<'a> {
    fn new(coordinator: &'a FilePersistenceCoordinator) -> Self {
        let dir = &coordinator.schema_dir;
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "schema".to_string());
        let staging = dir.with_file_name(format!("{}.staging-{}", base, Uuid::new_v4()));

        Self {
            coordinator,
            state: PersistState::Unchanged,
            staging,
            staged: Vec::new(),
            created: Vec::new(),
        }
    }

    fn transition(&mut self, next: PersistState) {
        tracing::debug!(
            event = Event::PersistStateChanged.as_str(),
            from = self.state.as_str(),
            to = next.as_str(),
            "schema persistence state change"
        );
        self.state = next;
    }

    fn faults(&self) -> &FaultInjector {
        &self.coordinator.faults
    }

    fn schema_dir(&self) -> &Path {
        &self.coordinator.schema_dir
    }

    fn take_snapshot(&mut self) -> io::Result<()> {
        fs::create_dir_all(&self.staging)?;
        self.faults().check(points::PERSIST_SNAPSHOT_COPY)?;

        for name in list_schema_files(self.schema_dir())? {
            copy_synced(&self.schema_dir().join(&name), &self.staging.join(&name))?;
            self.staged.push(name);
        }
        sync_dir(&self.staging)?;

        self.transition(PersistState::SnapshotTaken);
        Ok(())
    }

    fn write(&mut self, snapshot: &SchemaSnapshot, files: &BTreeSet<String>) -> io::Result<()> {
        for name in files {
            self.faults().check(points::PERSIST_WRITE_FILE)?;

            let target = self.schema_dir().join(name);
            let tmp = temp_path(&target);
            let existed = target.exists();
            let contents = render_schema_file(snapshot, name);

            fs::write(&tmp, contents.as_bytes())?;
            fs::OpenOptions::new().write(true).open(&tmp)?.sync_all()?;
            fs::rename(&tmp, &target)?;

            if !existed {
                self.created.push(name.clone());
            }
            if self.state != PersistState::Written {
                self.transition(PersistState::Written);
            }
        }

        self.faults().check(points::PERSIST_SYNC)?;
        sync_dir(self.schema_dir())
    }

    fn commit(&mut self) {
        self.transition(PersistState::Committed);
        self.discard_staging();
        tracing::info!(
            event = Event::PersistCommitted.as_str(),
            "schema files committed"
        );
    }

    fn discard_staging(&self) {
        if !self.staging.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.staging) {
            tracing::warn!(
                event = Event::PersistCleanupFailed.as_str(),
                path = %self.staging.display(),
                error = %e,
                "could not remove schema staging directory"
            );
        }
    }

    fn restore_originals(&self, files: &BTreeSet<String>) -> io::Result<()> {
        for name in &self.staged {
            self.faults().check(points::PERSIST_RESTORE_FILE)?;
            let target = self.schema_dir().join(name);
            let tmp = temp_path(&target);
            copy_synced(&self.staging.join(name), &tmp)?;
            fs::rename(&tmp, &target)?;
        }
        for name in &self.created {
            match fs::remove_file(self.schema_dir().join(name)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        for name in files {
            let tmp = temp_path(&self.schema_dir().join(name));
            match fs::remove_file(&tmp) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => tracing::warn!(
                    event = Event::PersistCleanupFailed.as_str(),
                    path = %tmp.display(),
                    error = %e,
                    "could not remove temporary schema file"
                ),
                _ => {}
            }
        }
        sync_dir(self.schema_dir())
    }

    fn recover(mut self, files: &BTreeSet<String>, cause: io::Error) -> PersistenceError {
        let failed_in = self.state;
        tracing::error!(
            event = Event::PersistFailed.as_str(),
            state = failed_in.as_str(),
            error = %cause,
            "schema file write failed; restoring original files"
        );

        match self.restore_originals(files) {
            Ok(()) => {
                self.transition(PersistState::RestoreOk);
                self.discard_staging();
                PersistenceError::restored(
                    format!(
                        "schema files could not be written (failed in {}); original files restored",
                        failed_in
                    ),
                    cause,
                )
            }
            Err(restore_error) => {
                self.transition(PersistState::RestoreFailed);
                let message = format!(
                    "schema files could not be written (failed in {}) and restoring the originals failed: {}",
                    failed_in, restore_error
                );
                self.coordinator.alerts.notify(Alert::new(
                    AlertKind::SchemaFilesInconsistent,
                    format!(
                        "{}; original files are in {}",
                        message,
                        self.staging.display()
                    ),
                ));
                PersistenceError::not_restored(message, &self.staging, cause)
            }
        }
    }
}
