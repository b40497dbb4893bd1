//! Schema modify operation handler
//!
//! Drives one modify request through
//! RECEIVED → PRIVILEGE_CHECKED → PARSED → VALIDATED → APPLIED → PERSISTED → COMPLETE
//! while the caller holds the schema write lock.
//!
//! Changes are validated and applied one by one on a private copy of the
//! published snapshot; the copy is published only when every change passed.
//! A persistence failure after publication is reported but the published
//! snapshot is kept: the in-memory schema reflects the change regardless of
//! the file outcome. The files that failure left behind stay pending and are
//! rewritten by the next request that reaches the files, whichever files
//! that request touches itself.

mod privilege;
mod request;
mod state;

pub use privilege::{Privilege, PrivilegeChecker, StaticPrivileges};
pub use request::{parse_request, Change, ModifyRequest};
pub use state::OperationState;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::observability::Event;
use crate::persistence::{ConcatSnapshotStore, FilePersistenceCoordinator};
use crate::schema::element::BUILTIN_SCHEMA_FILE;
use crate::schema::{
    AddPlan, DefinitionDecoder, ElementId, ElementKind, ModificationValidator, SchemaError,
    SchemaRepository, SchemaResult, SchemaSnapshot, SchemaWriteGuard, USER_SCHEMA_FILE,
};

/// Result of a completed modify request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifyOutcome {
    /// Repository generation after the request.
    pub generation: u64,
    pub modified_files: Vec<String>,
    pub changes: usize,
}

pub struct SchemaModifyOperationHandler {
    repository: Arc<SchemaRepository>,
    decoder: Arc<dyn DefinitionDecoder>,
    validator: Arc<ModificationValidator>,
    privileges: Arc<dyn PrivilegeChecker>,
    coordinator: Arc<FilePersistenceCoordinator>,
    concat: Option<ConcatSnapshotStore>,
    /// Files whose content lags the published catalog after a failed write.
    pending_files: Mutex<BTreeSet<String>>,
}

impl SchemaModifyOperationHandler {
    pub fn new(
        repository: Arc<SchemaRepository>,
        decoder: Arc<dyn DefinitionDecoder>,
        validator: Arc<ModificationValidator>,
        privileges: Arc<dyn PrivilegeChecker>,
        coordinator: Arc<FilePersistenceCoordinator>,
    ) -> Self {
        Self {
            repository,
            decoder,
            validator,
            privileges,
            coordinator,
            concat: None,
            pending_files: Mutex::new(BTreeSet::new()),
        }
    }

    /// Files still waiting to be rewritten from the published catalog.
    pub fn pending_files(&self) -> BTreeSet<String> {
        self.pending_files.lock().clone()
    }

    /// Refresh the concatenated snapshot after every persisted request.
    pub fn with_concat_store(mut self, store: ConcatSnapshotStore) -> Self {
        self.concat = Some(store);
        self
    }

    pub fn handle(
        &self,
        guard: &SchemaWriteGuard<'_>,
        request: &ModifyRequest,
    ) -> SchemaResult<ModifyOutcome> {
        let mut op = Operation::new();
        tracing::info!(
            event = Event::ModifyReceived.as_str(),
            principal = %request.principal,
            modifications = request.modifications.len(),
            "schema modify received"
        );

        let result = self.run(guard, request, &mut op);
        match &result {
            Ok(outcome) => tracing::info!(
                event = Event::ModifyComplete.as_str(),
                generation = outcome.generation,
                files = ?outcome.modified_files,
                "schema modify complete"
            ),
            Err(err) if op.state.is_applied() => tracing::error!(
                event = Event::PersistFailed.as_str(),
                state = op.state.as_str(),
                code = err.code().code(),
                error = %err,
                "schema modify applied in memory but not persisted"
            ),
            Err(err) => tracing::info!(
                event = Event::ModifyRejected.as_str(),
                state = op.state.as_str(),
                code = err.code().code(),
                error = %err,
                "schema modify rejected"
            ),
        }
        result
    }

    fn run(
        &self,
        guard: &SchemaWriteGuard<'_>,
        request: &ModifyRequest,
        op: &mut Operation,
    ) -> SchemaResult<ModifyOutcome> {
        if !self
            .privileges
            .has_privilege(&request.principal, Privilege::ModifySchema)
        {
            return Err(SchemaError::InsufficientPrivilege {
                privilege: Privilege::ModifySchema.to_string(),
            });
        }
        op.advance(OperationState::PrivilegeChecked);

        if request.is_empty() {
            op.advance(OperationState::Complete);
            return Ok(ModifyOutcome {
                generation: self.repository.generation(),
                modified_files: Vec::new(),
                changes: 0,
            });
        }

        let changes = parse_request(request, self.decoder.as_ref(), &self.validator)?;
        op.advance(OperationState::Parsed);

        let published = self.repository.snapshot();
        let mut working = SchemaSnapshot::clone(&published);
        let mut touched = self.apply_changes(&mut working, &changes)?;
        op.advance(OperationState::Validated);

        let generation = self.repository.publish(guard, working);
        op.advance(OperationState::Applied);
        tracing::info!(
            event = Event::ModifyApplied.as_str(),
            generation,
            changes = changes.len(),
            "schema change published"
        );

        let mut pending = self.pending_files.lock();
        if !pending.is_empty() {
            tracing::info!(
                event = Event::PersistCatchUp.as_str(),
                files = ?*pending,
                "rewriting schema files left behind by an earlier failure"
            );
            touched.extend(pending.iter().cloned());
        }

        let current = self.repository.snapshot();
        if let Err(e) = self.coordinator.persist(guard, &current, &touched) {
            pending.extend(touched);
            return Err(e.into());
        }
        pending.clear();
        drop(pending);
        op.advance(OperationState::Persisted);

        if let Some(store) = &self.concat {
            if let Err(e) = store.write_snapshot(self.coordinator.schema_dir()) {
                tracing::warn!(
                    event = Event::ConcatWriteFailed.as_str(),
                    error = %e,
                    "could not refresh concatenated schema snapshot; offline edit detection may report stale differences"
                );
            }
        }

        op.advance(OperationState::Complete);
        Ok(ModifyOutcome {
            generation,
            modified_files: touched.into_iter().collect(),
            changes: changes.len(),
        })
    }

    /// Validates and applies `changes` in order on `working`. Returns the
    /// schema files that need rewriting.
    fn apply_changes(
        &self,
        working: &mut SchemaSnapshot,
        changes: &[Change],
    ) -> SchemaResult<BTreeSet<String>> {
        let mut touched = BTreeSet::new();
        // Deletes waiting for the add that replaces them, by (kind, OID).
        let mut pending: HashMap<(ElementKind, String), ElementId> = HashMap::new();

        for (index, change) in changes.iter().enumerate() {
            match change {
                Change::Delete { kind, target } => {
                    let id = working.lookup_id(*kind, target).ok_or_else(|| {
                        SchemaError::NotFound {
                            kind: *kind,
                            name: target.clone(),
                        }
                    })?;
                    let oid = working
                        .get(id)
                        .map(|s| s.element.oid().to_ascii_lowercase())
                        .unwrap_or_default();
                    let deferred = changes[index + 1..].iter().any(|later| {
                        matches!(later, Change::Add(e) if e.kind() == *kind && e.oid().eq_ignore_ascii_case(&oid))
                    });

                    self.validator.validate_remove(working, id, deferred)?;
                    if deferred {
                        pending.insert((*kind, oid), id);
                    } else {
                        remove(working, id, &mut touched);
                    }
                }
                Change::Add(element) => {
                    let key = (element.kind(), element.oid().to_ascii_lowercase());
                    let replacing = pending.remove(&key);
                    let plan = self.validator.validate_add(working, element, replacing)?;
                    let file = element
                        .header()
                        .schema_file()
                        .unwrap_or(USER_SCHEMA_FILE)
                        .to_string();

                    match plan {
                        AddPlan::Insert => {
                            working.register(element.clone(), &file).map_err(|conflict| {
                                SchemaError::Conflict {
                                    kind: element.kind(),
                                    element: element.name_or_oid().to_string(),
                                    existing: conflict.existing,
                                }
                            })?;
                        }
                        AddPlan::Replace(id) => {
                            if let Some(old) = working.replace(id, element.clone(), &file) {
                                touched.insert(old.schema_file);
                            }
                        }
                    }
                    touched.insert(file);
                }
            }
        }

        // Deferred deletes no add consumed.
        for (_, id) in pending {
            self.validator.validate_remove(working, id, false)?;
            remove(working, id, &mut touched);
        }

        touched.remove(BUILTIN_SCHEMA_FILE);
        Ok(touched)
    }
}

fn remove(working: &mut SchemaSnapshot, id: ElementId, touched: &mut BTreeSet<String>) {
    if let Some(old) = working.deregister(id) {
        touched.insert(old.schema_file);
    }
}

/// Per-request state tracking.
struct Operation {
    state: OperationState,
}

impl Operation {
    fn new() -> Self {
        Self {
            state: OperationState::Received,
        }
    }

    fn advance(&mut self, next: OperationState) {
        tracing::debug!(
            event = Event::ModifyStateChanged.as_str(),
            from = self.state.as_str(),
            to = next.as_str(),
            "schema modify state change"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{points, FaultInjector};
    use crate::observability::MemoryAlertNotifier;
    use crate::persistence::{load_snapshot, PersistOutcome};
    use crate::schema::{Modification, ModificationType, Rfc4512Decoder, SchemaErrorCode, SchemaWriteLock};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ADMIN: &str = "cn=admin";

    const CORE: &str = "dn: cn=schema\n\
attributeTypes: ( 2.5.4.41 NAME 'name' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )\n\
attributeTypes: ( 2.5.4.3 NAME 'cn' SUP name )\n\
attributeTypes: ( 2.5.4.4 NAME 'sn' SUP name )\n\
objectClasses: ( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )\n\
attributeTypes: ( 2.5.4.0 NAME 'objectClass' EQUALITY objectIdentifierMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 )\n\
objectClasses: ( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) )\n";

    struct Fixture {
        _root: TempDir,
        schema_dir: PathBuf,
        faults: FaultInjector,
        repository: Arc<SchemaRepository>,
        handler: SchemaModifyOperationHandler,
        lock: SchemaWriteLock,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let schema_dir = root.path().join("schema");
        fs::create_dir(&schema_dir).unwrap();
        fs::write(schema_dir.join("00-core.ldif"), CORE).unwrap();

        let decoder = Arc::new(Rfc4512Decoder::new());
        let validator = Arc::new(ModificationValidator::new());
        let snapshot = load_snapshot(&schema_dir, decoder.as_ref(), &validator).unwrap();
        let repository = Arc::new(SchemaRepository::new(snapshot));
        let faults = FaultInjector::new();
        let coordinator = Arc::new(FilePersistenceCoordinator::new(
            &schema_dir,
            faults.clone(),
            Arc::new(MemoryAlertNotifier::new()),
        ));
        let handler = SchemaModifyOperationHandler::new(
            repository.clone(),
            decoder,
            validator,
            Arc::new(StaticPrivileges::new().grant(ADMIN, Privilege::ModifySchema)),
            coordinator,
        );
        Fixture {
            _root: root,
            schema_dir,
            faults,
            repository,
            handler,
            lock: SchemaWriteLock::new(),
        }
    }

    impl Fixture {
        fn modify(&self, request: ModifyRequest) -> SchemaResult<ModifyOutcome> {
            self.handler.handle(&self.lock.acquire(), &request)
        }
    }

    fn add(kind: ElementKind, definition: &str) -> ModifyRequest {
        ModifyRequest::new(ADMIN).with(Modification::add(kind, definition))
    }

    #[test]
    fn test_add_is_published_and_persisted() {
        let f = fixture();
        let outcome = f
            .modify(add(ElementKind::AttributeType, "( 1.9.1 NAME 'nickname' SUP name )"))
            .unwrap();

        assert_eq!(outcome.modified_files, vec![USER_SCHEMA_FILE.to_string()]);
        assert!(f.repository.lookup(ElementKind::AttributeType, "nickname").is_some());
        let text = fs::read_to_string(f.schema_dir.join(USER_SCHEMA_FILE)).unwrap();
        assert!(text.contains("'nickname'"));
    }

    #[test]
    fn test_missing_privilege_fails_closed() {
        let f = fixture();
        let request = ModifyRequest::new("uid=guest")
            .with(Modification::add(ElementKind::AttributeType, "( 1.9.1 NAME 'x' SUP name )"));
        let err = f.modify(request).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::DsSchemaInsufficientPrivilege);
        assert!(f.repository.lookup(ElementKind::AttributeType, "x").is_none());
    }

    #[test]
    fn test_empty_request_touches_nothing() {
        let f = fixture();
        let before = f.repository.generation();
        let outcome = f.modify(ModifyRequest::new(ADMIN)).unwrap();
        assert_eq!(outcome.generation, before);
        assert_eq!(outcome.changes, 0);
        assert!(!f.schema_dir.join(USER_SCHEMA_FILE).exists());
    }

    #[test]
    fn test_failed_change_leaves_earlier_changes_unpublished() {
        let f = fixture();
        let before = f.repository.generation();
        let request = ModifyRequest::new(ADMIN)
            .with(Modification::add(ElementKind::AttributeType, "( 1.9.1 NAME 'first' SUP name )"))
            .with(Modification::add(ElementKind::AttributeType, "( 1.9.2 NAME 'second' SUP missing )"));

        let err = f.modify(request).unwrap_err();

        assert_eq!(err.code(), SchemaErrorCode::DsSchemaUndefinedReference);
        assert!(f.repository.lookup(ElementKind::AttributeType, "first").is_none());
        assert_eq!(f.repository.generation(), before);
    }

    #[test]
    fn test_delete_then_add_replaces_in_place() {
        let f = fixture();
        let request = ModifyRequest::new(ADMIN)
            .with(Modification::delete(ElementKind::AttributeType, "sn"))
            .with(Modification::add(
                ElementKind::AttributeType,
                "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name X-SCHEMA-FILE '00-core.ldif' )",
            ));

        let outcome = f.modify(request).unwrap();

        assert_eq!(outcome.modified_files, vec!["00-core.ldif".to_string()]);
        let sn = f.repository.lookup(ElementKind::AttributeType, "surname").unwrap();
        assert_eq!(sn.oid(), "2.5.4.4");
        assert_eq!(f.repository.dependents_of(ElementKind::AttributeType, "sn").len(), 1);
    }

    #[test]
    fn test_delete_with_dependents_rejected() {
        let f = fixture();
        let request = ModifyRequest::new(ADMIN).with(Modification::delete(ElementKind::AttributeType, "sn"));
        let err = f.modify(request).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::DsSchemaDependentsExist);
    }

    #[test]
    fn test_persistence_failure_keeps_applied_change() {
        let f = fixture();
        f.faults.arm(points::PERSIST_WRITE_FILE);

        let err = f
            .modify(add(ElementKind::AttributeType, "( 1.9.1 NAME 'nickname' SUP name )"))
            .unwrap_err();

        match &err {
            SchemaError::Persistence(p) => assert_eq!(p.outcome(), PersistOutcome::Restored),
            other => panic!("unexpected error {other}"),
        }
        assert!(err.is_applied());
        assert!(f.repository.lookup(ElementKind::AttributeType, "nickname").is_some());
        assert!(!f.schema_dir.join(USER_SCHEMA_FILE).exists());
    }

    #[test]
    fn test_failed_file_is_rewritten_by_next_request() {
        let f = fixture();
        f.faults.arm(points::PERSIST_WRITE_FILE);
        f.modify(add(ElementKind::AttributeType, "( 1.9.1 NAME 'firstAttr' SUP name )"))
            .unwrap_err();
        f.faults.clear();
        assert_eq!(f.handler.pending_files(), BTreeSet::from([USER_SCHEMA_FILE.to_string()]));

        let outcome = f
            .modify(add(
                ElementKind::AttributeType,
                "( 1.9.2 NAME 'secondAttr' SUP name X-SCHEMA-FILE '98-other.ldif' )",
            ))
            .unwrap();

        assert_eq!(outcome.modified_files, vec!["98-other.ldif".to_string(), USER_SCHEMA_FILE.to_string()]);
        assert!(f.handler.pending_files().is_empty());
        let user = fs::read_to_string(f.schema_dir.join(USER_SCHEMA_FILE)).unwrap();
        assert!(user.contains("'firstAttr'"));
    }

    #[test]
    fn test_increment_rejected() {
        let f = fixture();
        let request = ModifyRequest::new(ADMIN).with(Modification::new(
            "attributeTypes",
            ModificationType::Increment,
            ["1"],
        ));
        assert_eq!(
            f.modify(request).unwrap_err().code(),
            SchemaErrorCode::DsSchemaUnsupportedOperation
        );
    }
}
