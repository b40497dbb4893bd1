//! Modification validator
//!
//! An add runs through these stages, in order, against a snapshot that is
//! not modified:
//!
//! 1. decode the definition (see [`ModificationValidator::decode`])
//! 2. target schema file name (see [`check_schema_file_name`])
//! 3. name / OID collision
//! 4. reference resolution
//! 5. structural / auxiliary role of referenced classes
//! 6. obsolescence propagation
//! 7. exclusive associations
//! 8. superior-chain cycles
//!
//! Stages 4 to 8 are [`CandidateCheck`] implementations. When the add
//! replaces an element deleted earlier in the same request, an extra check
//! verifies that the new definition still satisfies the existing dependents.
//!
//! At startup the same checks run over every loaded element.

use std::collections::HashSet;

use super::decoder::DefinitionDecoder;
use super::element::{
    ElementId, ElementKind, ObjectClassKind, Reference, ReferenceRole, SchemaElement,
    SCHEMA_FILE_EXTENSION, SCHEMA_FILE_SUFFIX,
};
use super::errors::{SchemaError, SchemaResult};
use super::repository::{SchemaSnapshot, StoredElement};

/// What the handler should do with an accepted add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPlan {
    Insert,
    Replace(ElementId),
}

/// Reference resolved against the snapshot.
#[derive(Debug, Clone)]
pub struct ResolvedReference<'a> {
    pub reference: Reference,
    pub target: &'a StoredElement,
}

/// Element under validation with its references resolved.
pub struct Candidate<'a> {
    pub snapshot: &'a SchemaSnapshot,
    pub element: &'a SchemaElement,
    /// ID the element has (or will keep) in the catalog, if any.
    pub id: Option<ElementId>,
    pub resolved: Vec<ResolvedReference<'a>>,
}

impl Candidate<'_> {
    fn kind(&self) -> ElementKind {
        self.element.kind()
    }

    fn name(&self) -> String {
        self.element.name_or_oid().to_string()
    }

    /// Whether a resolved reference points somewhere other than the candidate.
    fn is_foreign(&self, resolved: &ResolvedReference<'_>) -> bool {
        Some(resolved.target.id) != self.id
    }
}

/// One validation stage over a resolved candidate.
pub trait CandidateCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()>;
}

/// Structural / auxiliary role checks.
pub struct RoleCheck;

impl CandidateCheck for RoleCheck {
    fn name(&self) -> &'static str {
        "role"
    }

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        for resolved in &candidate.resolved {
            let required = match resolved.reference.role {
                ReferenceRole::StructuralClassInNameForm
                | ReferenceRole::StructuralClassInContentRule => ObjectClassKind::Structural,
                ReferenceRole::AuxiliaryClassInContentRule => ObjectClassKind::Auxiliary,
                _ => continue,
            };
            let actual = resolved.target.element.as_object_class().map(|oc| oc.kind);
            if actual == Some(required) {
                continue;
            }
            let class = resolved.target.name_or_oid().to_string();
            return Err(match required {
                ObjectClassKind::Auxiliary => SchemaError::NotAuxiliary {
                    kind: candidate.kind(),
                    element: candidate.name(),
                    class,
                },
                _ => SchemaError::NotStructural {
                    kind: candidate.kind(),
                    element: candidate.name(),
                    class,
                },
            });
        }
        Ok(())
    }
}

/// A non-obsolete element may only reference non-obsolete elements.
pub struct ObsolescenceCheck;

impl CandidateCheck for ObsolescenceCheck {
    fn name(&self) -> &'static str {
        "obsolescence"
    }

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        if candidate.element.is_obsolete() {
            return Ok(());
        }
        match candidate
            .resolved
            .iter()
            .find(|r| candidate.is_foreign(r) && r.target.element.is_obsolete())
        {
            Some(resolved) => Err(SchemaError::ObsoleteReference {
                kind: candidate.kind(),
                element: candidate.name(),
                target_kind: resolved.reference.kind,
                target: resolved.reference.target.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// One name form per structural class, one DIT content rule per structural
/// class, one structure rule per name form, one use per matching rule.
pub struct AssociationCheck;

impl AssociationCheck {
    fn exclusive_role(kind: ElementKind) -> Option<ReferenceRole> {
        match kind {
            ElementKind::NameForm => Some(ReferenceRole::StructuralClassInNameForm),
            ElementKind::DitContentRule => Some(ReferenceRole::StructuralClassInContentRule),
            ElementKind::DitStructureRule => Some(ReferenceRole::NameFormInStructureRule),
            ElementKind::MatchingRuleUse => Some(ReferenceRole::MatchingRuleOfUse),
            _ => None,
        }
    }
}

impl CandidateCheck for AssociationCheck {
    fn name(&self) -> &'static str {
        "association"
    }

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        let Some(role) = Self::exclusive_role(candidate.kind()) else {
            return Ok(());
        };
        for resolved in candidate.resolved.iter().filter(|r| r.reference.role == role) {
            let claimed_by = candidate
                .snapshot
                .dependents_of(resolved.target.id)
                .iter()
                .find(|dep| dep.role == role && Some(dep.source) != candidate.id)
                .and_then(|dep| candidate.snapshot.get(dep.source));

            if let Some(existing) = claimed_by {
                return Err(SchemaError::DuplicateAssociation {
                    kind: candidate.kind(),
                    element: candidate.name(),
                    existing: existing.name_or_oid().to_string(),
                    target_kind: resolved.reference.kind,
                    target: resolved.target.name_or_oid().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Superior chains must not loop back to the candidate.
pub struct CycleCheck;

impl CandidateCheck for CycleCheck {
    fn name(&self) -> &'static str {
        "cycle"
    }

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        let circular = || SchemaError::CircularReference {
            kind: candidate.kind(),
            element: candidate.name(),
        };

        let mut pending: Vec<ElementId> = Vec::new();
        for resolved in candidate.resolved.iter().filter(|r| r.reference.role.is_superior()) {
            if Some(resolved.target.id) == candidate.id {
                return Err(circular());
            }
            pending.push(resolved.target.id);
        }

        let Some(own_id) = candidate.id else {
            // A brand new element cannot be anyone's superior yet.
            return Ok(());
        };

        let mut visited = HashSet::new();
        let mut steps = 0usize;
        let limit = candidate.snapshot.len() + 1;

        while let Some(id) = pending.pop() {
            if id == own_id {
                return Err(circular());
            }
            if !visited.insert(id) {
                continue;
            }
            steps += 1;
            if steps > limit {
                return Err(circular());
            }
            pending.extend(candidate.snapshot.superiors_of(id));
        }
        Ok(())
    }
}

/// When replacing an element, every element that depends on it must stay
/// valid against the new definition.
pub struct DependentCompatibilityCheck;

impl CandidateCheck for DependentCompatibilityCheck {
    fn name(&self) -> &'static str {
        "dependents"
    }

    fn check(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        let Some(id) = candidate.id else {
            return Ok(());
        };
        let snapshot = candidate.snapshot;
        let Some(current) = snapshot.get(id) else {
            return Ok(());
        };

        for dep in snapshot.dependents_of(id) {
            if dep.source == id {
                continue;
            }
            let Some(dependent) = snapshot.get(dep.source) else {
                continue;
            };
            let still_referenced = dependent
                .element
                .references()
                .iter()
                .filter(|r| r.role == dep.role && r.kind == current.kind())
                .filter(|r| {
                    r.target.eq_ignore_ascii_case(current.element.oid())
                        || current.element.header().has_name(&r.target)
                })
                .all(|r| {
                    r.target.eq_ignore_ascii_case(candidate.element.oid())
                        || candidate.element.header().has_name(&r.target)
                });

            let dependents_exist = || SchemaError::DependentsExist {
                kind: current.kind(),
                element: current.name_or_oid().to_string(),
                dependent_kind: dependent.kind(),
                dependent: dependent.name_or_oid().to_string(),
                role: dep.role,
            };

            if !still_referenced {
                return Err(dependents_exist());
            }
            if candidate.element.is_obsolete() && !dependent.element.is_obsolete() {
                return Err(dependents_exist());
            }

            let class_kind = candidate.element.as_object_class().map(|oc| oc.kind);
            match dep.role {
                ReferenceRole::StructuralClassInNameForm
                | ReferenceRole::StructuralClassInContentRule
                    if class_kind != Some(ObjectClassKind::Structural) =>
                {
                    return Err(SchemaError::NotStructural {
                        kind: dependent.kind(),
                        element: dependent.name_or_oid().to_string(),
                        class: candidate.name(),
                    });
                }
                ReferenceRole::AuxiliaryClassInContentRule
                    if class_kind != Some(ObjectClassKind::Auxiliary) =>
                {
                    return Err(SchemaError::NotAuxiliary {
                        kind: dependent.kind(),
                        element: dependent.name_or_oid().to_string(),
                        class: candidate.name(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Runs the validation stages for adds, removes and loaded elements.
pub struct ModificationValidator {
    checks: Vec<Box<dyn CandidateCheck>>,
}

impl Default for ModificationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModificationValidator {
    pub fn new() -> Self {
        Self {
            checks: vec![
                Box::new(RoleCheck),
                Box::new(ObsolescenceCheck),
                Box::new(AssociationCheck),
                Box::new(CycleCheck),
            ],
        }
    }

    /// Stage 1: decode, with failures reported as [`SchemaError::Decode`].
    pub fn decode(
        &self,
        decoder: &dyn DefinitionDecoder,
        kind: ElementKind,
        definition: &str,
    ) -> SchemaResult<SchemaElement> {
        decoder.decode(kind, definition).map_err(|err| match err {
            SchemaError::Decode { .. } => err,
            other => SchemaError::Decode {
                kind,
                reason: other.to_string(),
            },
        })
    }

    /// Validates adding `element`.
    ///
    /// `replacing` is the ID of an element with the same kind and OID whose
    /// delete appeared earlier in the same request.
    pub fn validate_add(
        &self,
        snapshot: &SchemaSnapshot,
        element: &SchemaElement,
        replacing: Option<ElementId>,
    ) -> SchemaResult<AddPlan> {
        if let Some(file) = element.header().schema_file() {
            check_schema_file_name(element.kind(), file)?;
        }
        self.check_collisions(snapshot, element, replacing)?;

        let candidate = Candidate {
            snapshot,
            element,
            id: replacing,
            resolved: self.resolve(snapshot, element)?,
        };
        self.run_checks(&candidate)?;
        if replacing.is_some() {
            DependentCompatibilityCheck.check(&candidate)?;
        }

        Ok(match replacing {
            Some(id) => AddPlan::Replace(id),
            None => AddPlan::Insert,
        })
    }

    /// Validates removing the element `id`. With `deferred` set the element
    /// is about to be replaced within the same request and its dependents
    /// are checked against the replacement instead.
    pub fn validate_remove(
        &self,
        snapshot: &SchemaSnapshot,
        id: ElementId,
        deferred: bool,
    ) -> SchemaResult<()> {
        let Some(target) = snapshot.get(id) else {
            return Ok(());
        };
        if target.is_builtin() || !target.kind().is_modifiable() {
            return Err(SchemaError::UnsupportedOperation(format!(
                "{} '{}' cannot be removed",
                target.kind(),
                target.name_or_oid()
            )));
        }
        if deferred {
            return Ok(());
        }

        let first = snapshot
            .dependents_of(id)
            .iter()
            .filter(|dep| dep.source != id)
            .find_map(|dep| snapshot.get(dep.source).map(|s| (s, dep.role)));

        match first {
            Some((dependent, role)) => Err(SchemaError::DependentsExist {
                kind: target.kind(),
                element: target.name_or_oid().to_string(),
                dependent_kind: dependent.kind(),
                dependent: dependent.name_or_oid().to_string(),
                role,
            }),
            None => Ok(()),
        }
    }

    /// Runs stages 3 to 7 over an element already present in `snapshot`.
    pub fn check_loaded(&self, snapshot: &SchemaSnapshot, id: ElementId) -> SchemaResult<()> {
        let Some(stored) = snapshot.get(id) else {
            return Ok(());
        };
        let candidate = Candidate {
            snapshot,
            element: &stored.element,
            id: Some(id),
            resolved: self.resolve(snapshot, &stored.element)?,
        };
        self.run_checks(&candidate)
    }

    fn run_checks(&self, candidate: &Candidate<'_>) -> SchemaResult<()> {
        for check in &self.checks {
            check.check(candidate).map_err(|err| {
                tracing::debug!(
                    stage = check.name(),
                    element = candidate.element.name_or_oid(),
                    error = %err,
                    "schema validation stage failed"
                );
                err
            })?;
        }
        Ok(())
    }

    /// Stage 3.
    fn check_collisions(
        &self,
        snapshot: &SchemaSnapshot,
        element: &SchemaElement,
        replacing: Option<ElementId>,
    ) -> SchemaResult<()> {
        let kind = element.kind();

        // The OID of these two kinds is the OID of the element they govern,
        // so an OID clash is an association clash.
        if matches!(kind, ElementKind::DitContentRule | ElementKind::MatchingRuleUse) {
            if let Some(existing) = snapshot
                .lookup_oid(kind, element.oid())
                .filter(|id| Some(*id) != replacing)
                .and_then(|id| snapshot.get(id))
            {
                let target_kind = match kind {
                    ElementKind::DitContentRule => ElementKind::ObjectClass,
                    _ => ElementKind::MatchingRule,
                };
                return Err(SchemaError::DuplicateAssociation {
                    kind,
                    element: element.name_or_oid().to_string(),
                    existing: existing.name_or_oid().to_string(),
                    target_kind,
                    target: element.oid().to_string(),
                });
            }
        }

        let conflicts: Vec<ElementId> = snapshot
            .find_conflicts(element)
            .into_iter()
            .filter(|id| Some(*id) != replacing)
            .collect();
        if conflicts.is_empty() {
            return Ok(());
        }
        Err(SchemaError::Conflict {
            kind,
            element: element.name_or_oid().to_string(),
            existing: snapshot.conflict(conflicts).existing,
        })
    }

    /// Stage 4.
    fn resolve<'a>(
        &self,
        snapshot: &'a SchemaSnapshot,
        element: &SchemaElement,
    ) -> SchemaResult<Vec<ResolvedReference<'a>>> {
        element
            .references()
            .into_iter()
            .map(|reference| match snapshot.lookup(reference.kind, &reference.target) {
                Some(target) => Ok(ResolvedReference { reference, target }),
                None => Err(SchemaError::UndefinedReference {
                    kind: element.kind(),
                    element: element.name_or_oid().to_string(),
                    target_kind: reference.kind,
                    target: reference.target,
                }),
            })
            .collect()
    }
}

/// Stage 2: an `X-SCHEMA-FILE` value must be a plain `*.ldif` file name
/// directly inside the schema directory.
pub fn check_schema_file_name(kind: ElementKind, file: &str) -> SchemaResult<()> {
    let stem = file.strip_suffix(SCHEMA_FILE_SUFFIX).unwrap_or_default();
    let plain = !stem.is_empty()
        && !file.starts_with('.')
        && !file.contains("..")
        && !file.chars().any(|c| matches!(c, '/' | '\\') || c.is_control());
    if plain {
        return Ok(());
    }
    Err(SchemaError::Decode {
        kind,
        reason: format!(
            "{} '{}' is not a plain '{}' file name",
            SCHEMA_FILE_EXTENSION, file, SCHEMA_FILE_SUFFIX
        ),
    })
}
