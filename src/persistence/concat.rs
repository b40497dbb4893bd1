//! Concatenated schema snapshot
//!
//! A single file holding every definition of the schema directory, each
//! tagged with the file it came from. It is never authoritative: its only
//! use is to detect schema files that were edited while the server was
//! stopped.
//!
//! The newest `schema.ldif.<timestamp>` in the upgrade directory wins;
//! `schema.ldif.base` (shipped with the product) is the fallback.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::errors::ConcatError;
use super::files::{
    fold_line, list_schema_files, parse_definitions, read_definitions, write_atomically,
    SCHEMA_ENTRY_HEADER,
};
use crate::fault::{points, FaultInjector};
use crate::observability::Event;
use crate::schema::element::SCHEMA_FILE_EXTENSION;
use crate::schema::{ElementKind, Modification};

pub const CONCAT_FILE_PREFIX: &str = "schema.ldif.";
pub const CONCAT_BASE_NAME: &str = "schema.ldif.base";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const TIMESTAMP_PATTERN: &str = "YYYYMMDDTHHMMSS.mmmZ";

/// All definitions of a schema directory, grouped by kind in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcatenatedSchema {
    values: BTreeMap<ElementKind, Vec<String>>,
}

impl ConcatenatedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the definitions of every schema file in `schema_dir`.
    pub fn from_schema_dir(schema_dir: &Path) -> Result<Self, ConcatError> {
        let mut schema = Self::new();
        let files = list_schema_files(schema_dir).map_err(|e| ConcatError::io(schema_dir, e))?;
        for file in files {
            let path = schema_dir.join(&file);
            let definitions = read_definitions(&path).map_err(|e| ConcatError::io(&path, e))?;
            for definition in definitions {
                schema.push(definition.kind, tag_with_file(&definition.value, &file));
            }
        }
        Ok(schema)
    }

    pub fn read(path: &Path) -> Result<Self, ConcatError> {
        let text = fs::read_to_string(path).map_err(|e| ConcatError::io(path, e))?;
        let mut schema = Self::new();
        for definition in parse_definitions(&text) {
            schema.push(definition.kind, definition.value);
        }
        Ok(schema)
    }

    fn push(&mut self, kind: ElementKind, value: String) {
        let values = self.values.entry(kind).or_default();
        if !values.iter().any(|v| same_definition(v, &value)) {
            values.push(value);
        }
    }

    pub fn values(&self, kind: ElementKind) -> &[String] {
        self.values.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::from(SCHEMA_ENTRY_HEADER);
        for (kind, values) in &self.values {
            for value in values {
                out.push_str(&fold_line(&format!("{}: {}", kind.attribute_name(), value)));
            }
        }
        out
    }

    pub fn write(&self, path: &Path, faults: &FaultInjector) -> Result<(), ConcatError> {
        faults
            .check(points::CONCAT_WRITE)
            .and_then(|_| write_atomically(path, self.render().as_bytes()))
            .map_err(|e| ConcatError::io(path, e))
    }

    /// Changes that turn `self` (the stored snapshot) into `current`.
    ///
    /// Per kind, deletes of definitions that disappeared come first, then
    /// adds of new definitions, each in file order. An edited definition
    /// shows up as a delete of the old text plus an add of the new one.
    pub fn diff(&self, current: &ConcatenatedSchema) -> Vec<Modification> {
        let mut changes = Vec::new();
        for kind in ElementKind::ALL {
            let before = self.values(kind);
            let after = current.values(kind);

            for old in before {
                if !after.iter().any(|v| same_definition(v, old)) {
                    changes.push(Modification::delete(kind, old.clone()));
                }
            }
            for new in after {
                if !before.iter().any(|v| same_definition(v, new)) {
                    changes.push(Modification::add(kind, new.clone()));
                }
            }
        }
        changes
    }
}

/// Appends `X-SCHEMA-FILE '<file>'` unless the definition already names one.
fn tag_with_file(value: &str, file: &str) -> String {
    if value.to_ascii_uppercase().contains(SCHEMA_FILE_EXTENSION) {
        return value.to_string();
    }
    match value.trim_end().strip_suffix(')') {
        Some(body) => format!(
            "{} {} '{}' )",
            body.trim_end(),
            SCHEMA_FILE_EXTENSION,
            file
        ),
        None => value.to_string(),
    }
}

/// Definitions compare equal modulo whitespace runs.
fn same_definition(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

/// Locates, writes and prunes concatenated snapshots in the upgrade directory.
#[derive(Debug, Clone)]
pub struct ConcatSnapshotStore {
    upgrade_dir: PathBuf,
    retention: usize,
    faults: FaultInjector,
}

impl ConcatSnapshotStore {
    pub fn new(upgrade_dir: impl Into<PathBuf>, retention: usize, faults: FaultInjector) -> Self {
        Self {
            upgrade_dir: upgrade_dir.into(),
            retention: retention.max(1),
            faults,
        }
    }

    pub fn upgrade_dir(&self) -> &Path {
        &self.upgrade_dir
    }

    /// Timestamped snapshots, oldest first.
    fn timestamped(&self) -> Result<Vec<String>, ConcatError> {
        let entries =
            fs::read_dir(&self.upgrade_dir).map_err(|e| ConcatError::io(&self.upgrade_dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConcatError::io(&self.upgrade_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(CONCAT_FILE_PREFIX)
                && name != CONCAT_BASE_NAME
                && !name.ends_with(".tmp")
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Most recent snapshot file, falling back to the base snapshot.
    pub fn locate(&self) -> Result<PathBuf, ConcatError> {
        let missing = || ConcatError::Missing {
            dir: self.upgrade_dir.clone(),
            timestamped: format!("{}<{}>", CONCAT_FILE_PREFIX, TIMESTAMP_PATTERN),
            base: CONCAT_BASE_NAME.to_string(),
        };

        if !self.upgrade_dir.is_dir() {
            return Err(missing());
        }
        if let Some(newest) = self.timestamped()?.pop() {
            return Ok(self.upgrade_dir.join(newest));
        }
        let base = self.upgrade_dir.join(CONCAT_BASE_NAME);
        if base.is_file() {
            return Ok(base);
        }
        Err(missing())
    }

    /// Writes a new timestamped snapshot of `schema_dir` and prunes old ones.
    pub fn write_snapshot(&self, schema_dir: &Path) -> Result<PathBuf, ConcatError> {
        let schema = ConcatenatedSchema::from_schema_dir(schema_dir)?;
        let name = format!(
            "{}{}",
            CONCAT_FILE_PREFIX,
            Utc::now().format(TIMESTAMP_FORMAT)
        );
        let path = self.upgrade_dir.join(name);
        schema.write(&path, &self.faults)?;

        tracing::info!(
            event = Event::ConcatWritten.as_str(),
            path = %path.display(),
            definitions = schema.len(),
            "concatenated schema snapshot written"
        );

        self.prune();
        Ok(path)
    }

    /// Writes the base snapshot.
    pub fn write_base(&self, schema_dir: &Path) -> Result<PathBuf, ConcatError> {
        let schema = ConcatenatedSchema::from_schema_dir(schema_dir)?;
        let path = self.upgrade_dir.join(CONCAT_BASE_NAME);
        schema.write(&path, &self.faults)?;
        Ok(path)
    }

    /// Best effort; a failure only leaves extra files behind.
    fn prune(&self) {
        let names = match self.timestamped() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(event = Event::PersistCleanupFailed.as_str(), error = %e, "could not list concatenated snapshots");
                return;
            }
        };
        let excess = names.len().saturating_sub(self.retention);
        for name in &names[..excess] {
            let path = self.upgrade_dir.join(name);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(
                    event = Event::PersistCleanupFailed.as_str(),
                    path = %path.display(),
                    error = %e,
                    "could not remove old concatenated snapshot"
                );
            }
        }
    }

    /// Differences between the schema files and the latest snapshot.
    pub fn detect_changes(&self, schema_dir: &Path) -> Result<Vec<Modification>, ConcatError> {
        let stored = ConcatenatedSchema::read(&self.locate()?)?;
        let current = ConcatenatedSchema::from_schema_dir(schema_dir)?;
        Ok(stored.diff(&current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModificationType;
    use tempfile::TempDir;

    const CORE: &str = "dn: cn=schema\n\
attributeTypes: ( 2.5.4.41 NAME 'name' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )\n\
objectClasses: ( 2.5.6.0 NAME 'top' ABSTRACT )\n";

    struct Dirs {
        _root: TempDir,
        schema: PathBuf,
        upgrade: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = TempDir::new().unwrap();
        let schema = root.path().join("schema");
        let upgrade = root.path().join("upgrade");
        fs::create_dir(&schema).unwrap();
        fs::create_dir(&upgrade).unwrap();
        fs::write(schema.join("00-core.ldif"), CORE).unwrap();
        Dirs {
            _root: root,
            schema,
            upgrade,
        }
    }

    #[test]
    fn test_definitions_are_tagged_with_their_file() {
        let d = dirs();
        let schema = ConcatenatedSchema::from_schema_dir(&d.schema).unwrap();
        let at = &schema.values(ElementKind::AttributeType)[0];
        assert!(at.ends_with("X-SCHEMA-FILE '00-core.ldif' )"));
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_existing_tag_is_kept() {
        let tagged = tag_with_file("( 1.2 NAME 'x' SUP name X-SCHEMA-FILE '10-a.ldif' )", "20-b.ldif");
        assert!(tagged.contains("10-a.ldif"));
        assert!(!tagged.contains("20-b.ldif"));
    }

    #[test]
    fn test_locate_missing_names_both_candidates() {
        let d = dirs();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, FaultInjector::new());
        let err = store.locate().unwrap_err();
        let text = err.to_string();
        assert!(text.contains(CONCAT_BASE_NAME));
        assert!(text.contains("schema.ldif.<YYYYMMDDTHHMMSS.mmmZ>"));
    }

    #[test]
    fn test_locate_prefers_newest_timestamped() {
        let d = dirs();
        fs::write(d.upgrade.join(CONCAT_BASE_NAME), "dn: cn=schema\n").unwrap();
        fs::write(d.upgrade.join("schema.ldif.20240101T000000.000Z"), "").unwrap();
        fs::write(d.upgrade.join("schema.ldif.20250101T000000.000Z"), "").unwrap();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, FaultInjector::new());
        assert_eq!(
            store.locate().unwrap(),
            d.upgrade.join("schema.ldif.20250101T000000.000Z")
        );
    }

    #[test]
    fn test_no_changes_against_fresh_base() {
        let d = dirs();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, FaultInjector::new());
        store.write_base(&d.schema).unwrap();
        assert!(store.detect_changes(&d.schema).unwrap().is_empty());
    }

    #[test]
    fn test_offline_edit_is_detected() {
        let d = dirs();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, FaultInjector::new());
        store.write_base(&d.schema).unwrap();

        let edited = CORE.replace("'name'", "'label'");
        fs::write(d.schema.join("00-core.ldif"), edited).unwrap();

        let changes = store.detect_changes(&d.schema).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].mod_type, ModificationType::Delete);
        assert!(changes[0].values[0].contains("'name'"));
        assert_eq!(changes[1].mod_type, ModificationType::Add);
        assert!(changes[1].values[0].contains("'label'"));
    }

    #[test]
    fn test_retention_prunes_old_snapshots() {
        let d = dirs();
        fs::write(d.upgrade.join("schema.ldif.20000101T000000.000Z"), "").unwrap();
        fs::write(d.upgrade.join("schema.ldif.20010101T000000.000Z"), "").unwrap();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, FaultInjector::new());

        let written = store.write_snapshot(&d.schema).unwrap();

        assert_eq!(store.timestamped().unwrap().len(), 1);
        assert_eq!(store.locate().unwrap(), written);
    }

    #[test]
    fn test_write_fault_leaves_previous_snapshot() {
        let d = dirs();
        let faults = FaultInjector::new();
        let store = ConcatSnapshotStore::new(&d.upgrade, 1, faults.clone());
        let base = store.write_base(&d.schema).unwrap();

        faults.arm(points::CONCAT_WRITE);
        assert!(store.write_snapshot(&d.schema).is_err());
        assert_eq!(store.locate().unwrap(), base);
    }
}
