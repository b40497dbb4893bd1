//! In-memory schema catalog
//!
//! [`SchemaSnapshot`] is an immutable-once-published catalog: a canonical
//! store keyed by [`ElementId`], per-kind name and OID indexes over it, the
//! resolved reference edges of every element and the reverse dependency
//! index. Writers clone the current snapshot, mutate the private copy and
//! publish it through [`SchemaRepository`] in a single atomic pointer swap.
//! Readers load the current pointer and never block.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::builtins::builtin_elements;
use super::element::{
    ElementId, ElementKind, Reference, ReferenceRole, SchemaElement, BUILTIN_SCHEMA_FILE,
};
use super::lock::SchemaWriteGuard;

/// An element as stored in the catalog.
#[derive(Debug, Clone)]
pub struct StoredElement {
    pub id: ElementId,
    pub element: Arc<SchemaElement>,
    /// Schema file the element is persisted in.
    pub schema_file: String,
}

impl StoredElement {
    pub fn kind(&self) -> ElementKind {
        self.element.kind()
    }

    pub fn name_or_oid(&self) -> &str {
        self.element.name_or_oid()
    }

    pub fn is_builtin(&self) -> bool {
        self.schema_file == BUILTIN_SCHEMA_FILE
    }
}

/// Resolved outgoing reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub target: ElementId,
    pub role: ReferenceRole,
}

/// Resolved incoming reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
    pub source: ElementId,
    pub role: ReferenceRole,
}

/// Registration refused because of name or OID collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterConflict {
    pub ids: Vec<ElementId>,
    /// Names of at most two colliding elements, in name order.
    pub existing: Vec<String>,
}

type IndexKey = (ElementKind, String);

fn index_key(kind: ElementKind, value: &str) -> IndexKey {
    (kind, value.trim().to_ascii_lowercase())
}

/// Immutable view of the full catalog.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    entries: HashMap<ElementId, StoredElement>,
    names: HashMap<IndexKey, Vec<ElementId>>,
    oids: HashMap<IndexKey, ElementId>,
    edges: HashMap<ElementId, Vec<Edge>>,
    dependents: HashMap<ElementId, Vec<Dependent>>,
    next_id: u64,
    generation: u64,
}

impl SchemaSnapshot {
    /// Empty catalog without built-ins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding only the built-in syntaxes and matching rules.
    pub fn with_builtins() -> Self {
        let mut snapshot = Self::new();
        for element in builtin_elements() {
            snapshot.insert_unlinked(element, BUILTIN_SCHEMA_FILE);
        }
        snapshot
    }

    /// Number of times a new catalog has been published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ElementId) -> Option<&StoredElement> {
        self.entries.get(&id)
    }

    /// Finds an element by OID or by any of its names, case-insensitively.
    pub fn lookup(&self, kind: ElementKind, name_or_oid: &str) -> Option<&StoredElement> {
        self.lookup_id(kind, name_or_oid)
            .and_then(|id| self.entries.get(&id))
    }

    pub fn lookup_id(&self, kind: ElementKind, name_or_oid: &str) -> Option<ElementId> {
        let key = index_key(kind, name_or_oid);
        self.oids
            .get(&key)
            .copied()
            .or_else(|| self.names.get(&key).and_then(|ids| ids.first().copied()))
    }

    pub fn lookup_oid(&self, kind: ElementKind, oid: &str) -> Option<ElementId> {
        self.oids.get(&index_key(kind, oid)).copied()
    }

    /// Elements of one kind in registration order.
    pub fn elements(&self, kind: ElementKind) -> Vec<&StoredElement> {
        let mut elements: Vec<&StoredElement> =
            self.entries.values().filter(|e| e.kind() == kind).collect();
        elements.sort_by_key(|e| e.id);
        elements
    }

    /// Every element, ordered by kind then registration order.
    pub fn all_elements(&self) -> Vec<&StoredElement> {
        let mut elements: Vec<&StoredElement> = self.entries.values().collect();
        elements.sort_by_key(|e| (e.kind(), e.id));
        elements
    }

    /// Elements persisted in `file`, ordered by kind then registration order.
    pub fn elements_in_file(&self, file: &str) -> Vec<&StoredElement> {
        let mut elements: Vec<&StoredElement> = self
            .entries
            .values()
            .filter(|e| e.schema_file == file)
            .collect();
        elements.sort_by_key(|e| (e.kind(), e.id));
        elements
    }

    /// Names of all schema files that hold at least one element.
    pub fn schema_files(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .filter(|e| !e.is_builtin())
            .map(|e| e.schema_file.clone())
            .collect()
    }

    /// Elements referencing `id`, in the order the references were linked.
    pub fn dependents_of(&self, id: ElementId) -> &[Dependent] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn edges_of(&self, id: ElementId) -> &[Edge] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn superiors_of(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        self.edges_of(id)
            .iter()
            .filter(|edge| edge.role.is_superior())
            .map(|edge| edge.target)
    }

    /// Existing elements of the same kind sharing the OID or a name with
    /// `element`, each reported once, ordered by name.
    pub fn find_conflicts(&self, element: &SchemaElement) -> Vec<ElementId> {
        let kind = element.kind();
        let mut found: Vec<ElementId> = Vec::new();

        let oid_hit = self.lookup_oid(kind, element.oid());
        let name_hits = element
            .names()
            .iter()
            .filter_map(|name| self.names.get(&index_key(kind, name)))
            .flatten()
            .copied();

        for id in oid_hit.into_iter().chain(name_hits) {
            if !found.contains(&id) {
                found.push(id);
            }
        }

        found.sort_by_cached_key(|id| {
            self.entries
                .get(id)
                .map(|e| e.name_or_oid().to_ascii_lowercase())
                .unwrap_or_default()
        });
        found
    }

    /// Registers a new element and links its references.
    ///
    /// References that do not resolve are left unlinked; the validator
    /// rejects such elements before they get here.
    pub fn register(
        &mut self,
        element: SchemaElement,
        schema_file: &str,
    ) -> Result<ElementId, RegisterConflict> {
        let conflicts = self.find_conflicts(&element);
        if !conflicts.is_empty() {
            return Err(self.conflict(conflicts));
        }
        let id = self.insert_unlinked(element, schema_file);
        self.link(id);
        Ok(id)
    }

    /// Describes up to two colliding elements.
    pub fn conflict(&self, mut ids: Vec<ElementId>) -> RegisterConflict {
        ids.truncate(2);
        let existing = ids
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|e| e.name_or_oid().to_string())
            .collect();
        RegisterConflict { ids, existing }
    }

    /// Swaps the definition behind `id`, keeping the ID so that elements
    /// depending on it stay linked.
    pub fn replace(
        &mut self,
        id: ElementId,
        element: SchemaElement,
        schema_file: &str,
    ) -> Option<StoredElement> {
        let old = self.entries.remove(&id)?;
        self.unlink(id);
        self.unindex(&old);

        let stored = StoredElement {
            id,
            element: Arc::new(element),
            schema_file: schema_file.to_string(),
        };
        self.index(&stored);
        self.entries.insert(id, stored);
        self.link(id);
        Some(old)
    }

    /// Removes an element. Callers must have checked it has no dependents.
    pub fn deregister(&mut self, id: ElementId) -> Option<StoredElement> {
        let old = self.entries.remove(&id)?;
        self.unlink(id);
        self.unindex(&old);
        self.dependents.remove(&id);
        Some(old)
    }

    /// Adds an element to the store and indexes without linking references.
    pub(crate) fn insert_unlinked(&mut self, element: SchemaElement, schema_file: &str) -> ElementId {
        self.next_id += 1;
        let id = ElementId(self.next_id);
        let stored = StoredElement {
            id,
            element: Arc::new(element),
            schema_file: schema_file.to_string(),
        };
        self.index(&stored);
        self.entries.insert(id, stored);
        id
    }

    /// Resolves and links the references of `id`. Returns the references
    /// that did not resolve.
    pub(crate) fn link(&mut self, id: ElementId) -> Vec<Reference> {
        let Some(stored) = self.entries.get(&id) else {
            return Vec::new();
        };
        let mut unresolved = Vec::new();
        let mut edges = Vec::new();

        for reference in stored.element.references() {
            match self.lookup_id(reference.kind, &reference.target) {
                Some(target) => edges.push(Edge {
                    target,
                    role: reference.role,
                }),
                None => unresolved.push(reference),
            }
        }

        for edge in &edges {
            self.dependents.entry(edge.target).or_default().push(Dependent {
                source: id,
                role: edge.role,
            });
        }
        self.edges.insert(id, edges);
        unresolved
    }

    fn unlink(&mut self, id: ElementId) {
        for edge in self.edges.remove(&id).unwrap_or_default() {
            if let Some(deps) = self.dependents.get_mut(&edge.target) {
                deps.retain(|d| d.source != id);
                if deps.is_empty() {
                    self.dependents.remove(&edge.target);
                }
            }
        }
    }

    fn index(&mut self, stored: &StoredElement) {
        let kind = stored.kind();
        self.oids
            .insert(index_key(kind, stored.element.oid()), stored.id);
        for name in stored.element.names() {
            let ids = self.names.entry(index_key(kind, name)).or_default();
            if !ids.contains(&stored.id) {
                ids.push(stored.id);
            }
        }
    }

    fn unindex(&mut self, stored: &StoredElement) {
        let kind = stored.kind();
        let oid_key = index_key(kind, stored.element.oid());
        if self.oids.get(&oid_key) == Some(&stored.id) {
            self.oids.remove(&oid_key);
        }
        for name in stored.element.names() {
            let key = index_key(kind, name);
            if let Some(ids) = self.names.get_mut(&key) {
                ids.retain(|id| *id != stored.id);
                if ids.is_empty() {
                    self.names.remove(&key);
                }
            }
        }
    }
}

/// Authoritative catalog handle shared by readers and the single writer.
#[derive(Debug)]
pub struct SchemaRepository {
    current: ArcSwap<SchemaSnapshot>,
}

impl SchemaRepository {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Current published catalog.
    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn lookup(&self, kind: ElementKind, name_or_oid: &str) -> Option<Arc<SchemaElement>> {
        self.current
            .load()
            .lookup(kind, name_or_oid)
            .map(|stored| Arc::clone(&stored.element))
    }

    /// Elements referencing the named element, with the role of each reference.
    pub fn dependents_of(
        &self,
        kind: ElementKind,
        name_or_oid: &str,
    ) -> Vec<(Arc<SchemaElement>, ReferenceRole)> {
        let snapshot = self.current.load();
        let Some(id) = snapshot.lookup_id(kind, name_or_oid) else {
            return Vec::new();
        };
        snapshot
            .dependents_of(id)
            .iter()
            .filter_map(|dep| {
                snapshot
                    .get(dep.source)
                    .map(|s| (Arc::clone(&s.element), dep.role))
            })
            .collect()
    }

    /// Registers one element and publishes the result.
    pub fn register(
        &self,
        guard: &SchemaWriteGuard<'_>,
        element: SchemaElement,
        schema_file: &str,
    ) -> Result<ElementId, RegisterConflict> {
        let mut working = SchemaSnapshot::clone(&self.current.load());
        let id = working.register(element, schema_file)?;
        self.publish(guard, working);
        Ok(id)
    }

    /// Removes one element and publishes the result. Returns false if the
    /// element does not exist.
    pub fn deregister(&self, guard: &SchemaWriteGuard<'_>, kind: ElementKind, name_or_oid: &str) -> bool {
        let mut working = SchemaSnapshot::clone(&self.current.load());
        let Some(id) = working.lookup_id(kind, name_or_oid) else {
            return false;
        };
        working.deregister(id);
        self.publish(guard, working);
        true
    }

    /// Atomically replaces the published catalog. Returns the new generation.
    pub fn publish(&self, _guard: &SchemaWriteGuard<'_>, mut snapshot: SchemaSnapshot) -> u64 {
        snapshot.generation = self.current.load().generation + 1;
        let generation = snapshot.generation;
        self.current.store(Arc::new(snapshot));
        generation
    }
}
