//! Schema server root
//!
//! Owns everything the schema subsystem shares between requests: the
//! published repository, the writer lock, the modify handler, the file
//! persistence coordinator and the backup and restore managers.
//!
//! # Startup Sequence
//!
//! 0. Take the advisory lock on the schema directory (held until drop)
//! 1. Build a catalog from every schema file (any failure is FATAL)
//! 2. Locate the latest concatenated snapshot (missing is FATAL)
//! 3. Compare it with the schema files; differences are offline changes
//! 4. Record a fresh concatenated snapshot if offline changes were found
//! 5. Publish the catalog and accept requests
//!
//! Every mutating operation takes the writer lock for its full duration.
//! One process serves a schema directory at a time.

mod errors;

pub use errors::{ServerError, ServerResult};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::backup::{BackupDescriptor, BackupManager, BackupOptions, CryptoProviders};
use crate::config::ServerConfig;
use crate::fault::FaultInjector;
use crate::handler::{
    ModifyOutcome, ModifyRequest, Privilege, PrivilegeChecker, SchemaModifyOperationHandler,
    StaticPrivileges,
};
use crate::observability::{Alert, AlertKind, AlertNotifier, Event, LogAlertNotifier};
use crate::persistence::{load_snapshot, ConcatSnapshotStore, FilePersistenceCoordinator};
use crate::restore::{RestoreManager, RestoreReport};
use crate::schema::{
    DefinitionDecoder, DirectoryLock, ElementKind, Modification, ModificationValidator,
    Rfc4512Decoder, SchemaRepository, SchemaSnapshot, SchemaWriteLock, StoredElement,
};

/// Principal holding every privilege when no checker is supplied.
pub const ROOT_PRINCIPAL: &str = "cn=Directory Manager";

/// Collaborators that tests and embedders replace.
pub struct ServerContext {
    pub privileges: Arc<dyn PrivilegeChecker>,
    pub alerts: Arc<dyn AlertNotifier>,
    pub faults: FaultInjector,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self {
            privileges: Arc::new(StaticPrivileges::new().grant(ROOT_PRINCIPAL, Privilege::ModifySchema)),
            alerts: Arc::new(LogAlertNotifier),
            faults: FaultInjector::from_env(),
        }
    }
}

pub struct SchemaServer {
    config: ServerConfig,
    lock: SchemaWriteLock,
    _directory_lock: DirectoryLock,
    repository: Arc<SchemaRepository>,
    decoder: Arc<dyn DefinitionDecoder>,
    validator: Arc<ModificationValidator>,
    handler: SchemaModifyOperationHandler,
    concat: ConcatSnapshotStore,
    backups: BackupManager,
    restorer: RestoreManager,
    offline_changes: Vec<Modification>,
}

impl SchemaServer {
    /// Creates the schema, upgrade and backup directories and records the
    /// base concatenated snapshot if there is none yet.
    pub fn init(config: &ServerConfig) -> ServerResult<()> {
        let upgrade_dir = config.upgrade_path();
        let backup_dir = config.backup_path();
        for dir in [config.schema_path(), upgrade_dir.as_path(), backup_dir.as_path()] {
            fs::create_dir_all(dir).map_err(|e| ServerError::io(dir, e))?;
        }

        let store = ConcatSnapshotStore::new(
            &upgrade_dir,
            config.concat_retention,
            FaultInjector::from_env(),
        );
        if store.locate().is_err() {
            let path = store.write_base(config.schema_path())?;
            tracing::info!(
                event = Event::ConcatWritten.as_str(),
                path = %path.display(),
                "base concatenated schema snapshot written"
            );
        }
        Ok(())
    }

    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        Self::open_with(config, ServerContext::default())
    }

    pub fn open_with(config: ServerConfig, context: ServerContext) -> ServerResult<Self> {
        config.validate()?;
        let schema_dir = config.schema_path();
        let directory_lock = DirectoryLock::try_acquire(schema_dir)
            .map_err(|e| ServerError::io(&DirectoryLock::path_for(schema_dir), e))?
            .ok_or_else(|| ServerError::Locked {
                path: DirectoryLock::path_for(schema_dir),
            })?;
        tracing::info!(
            event = Event::ServerStartBegin.as_str(),
            schema_dir = %config.schema_path().display(),
            "schema server starting"
        );

        let decoder: Arc<dyn DefinitionDecoder> = Arc::new(Rfc4512Decoder::new());
        let validator = Arc::new(ModificationValidator::new());
        let snapshot = load_catalog(config.schema_path(), decoder.as_ref(), &validator)?;
        let repository = Arc::new(SchemaRepository::new(snapshot));

        let concat = ConcatSnapshotStore::new(
            config.upgrade_path(),
            config.concat_retention,
            context.faults.clone(),
        );
        concat.locate()?;
        let offline_changes = detect_offline_changes(&concat, config.schema_path(), context.alerts.as_ref());

        let coordinator = Arc::new(FilePersistenceCoordinator::new(
            config.schema_path(),
            context.faults.clone(),
            context.alerts.clone(),
        ));
        let handler = SchemaModifyOperationHandler::new(
            repository.clone(),
            decoder.clone(),
            validator.clone(),
            context.privileges,
            coordinator,
        )
        .with_concat_store(concat.clone());

        let providers = Arc::new(CryptoProviders::standard(config.mac_key()?, config.cipher_key()?)?);
        let backups = BackupManager::new(
            config.backup_path(),
            config.product_name.clone(),
            providers.clone(),
            config.algorithms(),
            context.faults.clone(),
        );
        let restorer = RestoreManager::new(providers, context.faults, context.alerts);

        tracing::info!(
            event = Event::ServerStartComplete.as_str(),
            elements = repository.snapshot().len(),
            offline_changes = offline_changes.len(),
            "schema server started"
        );

        Ok(Self {
            config,
            lock: SchemaWriteLock::new(),
            _directory_lock: directory_lock,
            repository,
            decoder,
            validator,
            handler,
            concat,
            backups,
            restorer,
            offline_changes,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<SchemaRepository> {
        &self.repository
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.repository.snapshot()
    }

    /// Modifications made to the schema files while the server was down,
    /// as found at startup.
    pub fn offline_changes(&self) -> &[Modification] {
        &self.offline_changes
    }

    pub fn lookup(&self, kind: ElementKind, name_or_oid: &str) -> Option<StoredElement> {
        self.repository
            .snapshot()
            .lookup(kind, name_or_oid)
            .cloned()
    }

    pub fn modify(&self, request: &ModifyRequest) -> ServerResult<ModifyOutcome> {
        let guard = self.lock.acquire();
        Ok(self.handler.handle(&guard, request)?)
    }

    /// Adds one definition on behalf of `principal`.
    pub fn add(&self, principal: &str, kind: ElementKind, definition: &str) -> ServerResult<ModifyOutcome> {
        self.modify(&ModifyRequest::new(principal).with(Modification::add(kind, definition)))
    }

    /// Removes one element, named by name, OID or full definition.
    pub fn remove(&self, principal: &str, kind: ElementKind, target: &str) -> ServerResult<ModifyOutcome> {
        self.modify(&ModifyRequest::new(principal).with(Modification::delete(kind, target)))
    }

    pub fn backup(&self, options: &BackupOptions) -> ServerResult<BackupDescriptor> {
        let guard = self.lock.acquire();
        Ok(self
            .backups
            .create_backup(&guard, self.config.schema_path(), options)?)
    }

    pub fn remove_backup(&self, backup_id: &str) -> ServerResult<()> {
        let guard = self.lock.acquire();
        Ok(self.backups.remove_backup(&guard, backup_id)?)
    }

    /// Restores or verifies a backup. A restore reloads the catalog from
    /// the restored files before the lock is released.
    pub fn restore_or_verify(&self, backup_id: &str, verify_only: bool) -> ServerResult<RestoreReport> {
        let guard = self.lock.acquire();
        let report = self.restorer.restore_or_verify(
            &guard,
            self.backups.backup_dir(),
            backup_id,
            self.config.schema_path(),
            verify_only,
        )?;
        if verify_only {
            return Ok(report);
        }

        let snapshot = load_catalog(self.config.schema_path(), self.decoder.as_ref(), &self.validator)?;
        let generation = self.repository.publish(&guard, snapshot);
        tracing::info!(
            event = Event::SchemaLoaded.as_str(),
            generation,
            backup_id = %backup_id,
            "schema reloaded from restored files"
        );

        if let Err(e) = self.concat.write_snapshot(self.config.schema_path()) {
            tracing::warn!(
                event = Event::ConcatWriteFailed.as_str(),
                error = %e,
                "could not record concatenated snapshot after restore"
            );
        }
        Ok(report)
    }
}

fn load_catalog(
    schema_dir: &Path,
    decoder: &dyn DefinitionDecoder,
    validator: &ModificationValidator,
) -> ServerResult<SchemaSnapshot> {
    match load_snapshot(schema_dir, decoder, validator) {
        Ok(snapshot) => {
            tracing::info!(
                event = Event::SchemaLoaded.as_str(),
                elements = snapshot.len(),
                "schema files loaded"
            );
            Ok(snapshot)
        }
        Err(e) => {
            tracing::error!(
                event = Event::SchemaLoadFailed.as_str(),
                code = e.code(),
                file = e.file().unwrap_or(""),
                error = %e,
                "schema files could not be loaded"
            );
            Err(e.into())
        }
    }
}

/// Never fails startup; a diff error is logged and treated as no changes.
fn detect_offline_changes(
    store: &ConcatSnapshotStore,
    schema_dir: &Path,
    alerts: &dyn AlertNotifier,
) -> Vec<Modification> {
    let changes = match store.detect_changes(schema_dir) {
        Ok(changes) => changes,
        Err(e) => {
            tracing::warn!(
                event = Event::ConcatDiffFailed.as_str(),
                error = %e,
                "could not compare schema files with the concatenated snapshot"
            );
            return Vec::new();
        }
    };
    if changes.is_empty() {
        return changes;
    }

    for change in &changes {
        tracing::info!(
            event = Event::OfflineChangesDetected.as_str(),
            attribute = %change.attribute,
            mod_type = %change.mod_type,
            values = ?change.values,
            "schema file changed while offline"
        );
    }
    alerts.notify(Alert::new(
        AlertKind::OfflineSchemaChanges,
        format!(
            "{} schema modification(s) were made to {} while the server was offline",
            changes.len(),
            schema_dir.display()
        ),
    ));

    if let Err(e) = store.write_snapshot(schema_dir) {
        tracing::warn!(
            event = Event::ConcatWriteFailed.as_str(),
            error = %e,
            "could not record concatenated snapshot; offline changes will be reported again"
        );
    }
    changes
}
