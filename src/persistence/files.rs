//! Schema definition files
//!
//! The schema directory holds `*.ldif` files processed in lexical order.
//! Each file is an LDIF-style subschema entry:
//!
//! ```text
//! dn: cn=schema
//! objectClass: top
//! objectClass: ldapSubentry
//! objectClass: subschema
//! attributeTypes: ( 1.2.3 NAME 'x' SUP name )
//! ```
//!
//! Long values are folded onto continuation lines that start with a single
//! space. Lines starting with `#` are comments.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::errors::LoadError;
use crate::schema::encoder::encode;
use crate::schema::{
    DefinitionDecoder, ElementId, ElementKind, ModificationValidator, SchemaError, SchemaSnapshot,
    StoredElement, SCHEMA_FILE_SUFFIX,
};

/// Entry header written at the top of every schema file.
pub const SCHEMA_ENTRY_HEADER: &str =
    "dn: cn=schema\nobjectClass: top\nobjectClass: ldapSubentry\nobjectClass: subschema\n";

const FOLD_WIDTH: usize = 78;

/// One definition value read from a schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDefinition {
    pub kind: ElementKind,
    pub value: String,
    /// Line number where the value starts (1-based).
    pub line: usize,
}

/// Names of the schema files in `dir`, sorted.
pub fn list_schema_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(SCHEMA_FILE_SUFFIX) {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_definitions(path: &Path) -> io::Result<Vec<RawDefinition>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_definitions(&text))
}

/// Extracts the schema definition values from LDIF text. Attributes other
/// than the subschema attributes (dn, objectClass, cn, ...) are skipped.
pub fn parse_definitions(text: &str) -> Vec<RawDefinition> {
    let mut logical: Vec<(usize, String)> = Vec::new();
    let mut in_comment = false;

    for (idx, line) in text.lines().enumerate() {
        if let Some(rest) = line.strip_prefix(' ') {
            if in_comment {
                continue;
            }
            if let Some((_, current)) = logical.last_mut() {
                current.push_str(rest);
            }
            continue;
        }
        in_comment = line.starts_with('#');
        if in_comment || line.trim().is_empty() {
            continue;
        }
        logical.push((idx + 1, line.to_string()));
    }

    logical
        .into_iter()
        .filter_map(|(line, text)| {
            let (attribute, rest) = text.split_once(':')?;
            let kind = ElementKind::from_attribute_name(attribute)?;
            let value = match rest.strip_prefix(':') {
                Some(encoded) => {
                    let bytes = BASE64.decode(encoded.trim()).ok()?;
                    String::from_utf8(bytes).ok()?
                }
                None => rest.trim().to_string(),
            };
            Some(RawDefinition {
                kind,
                value: value.trim().to_string(),
                line,
            })
        })
        .collect()
}

/// Folds one `attribute: value` line at [`FOLD_WIDTH`] bytes.
pub fn fold_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + line.len() / FOLD_WIDTH * 2 + 1);
    let mut width = 0;
    let mut limit = FOLD_WIDTH;
    for c in line.chars() {
        if width + c.len_utf8() > limit {
            out.push_str("\n ");
            width = 0;
            limit = FOLD_WIDTH - 1;
        }
        out.push(c);
        width += c.len_utf8();
    }
    out.push('\n');
    out
}

/// Renders the full content of one schema file from the catalog.
pub fn render_schema_file(snapshot: &SchemaSnapshot, file: &str) -> String {
    let mut out = String::from(SCHEMA_ENTRY_HEADER);
    for stored in ordered_for_file(snapshot, file) {
        let line = format!("{}: {}", stored.kind().attribute_name(), encode(&stored.element));
        out.push_str(&fold_line(&line));
    }
    out
}

/// Elements of a file in kind order with superiors ahead of subordinates.
fn ordered_for_file<'a>(snapshot: &'a SchemaSnapshot, file: &str) -> Vec<&'a StoredElement> {
    let in_file = snapshot.elements_in_file(file);
    let members: HashSet<ElementId> = in_file.iter().map(|e| e.id).collect();
    let mut emitted = HashSet::new();
    let mut ordered = Vec::with_capacity(in_file.len());

    for stored in &in_file {
        let mut stack = vec![(stored.id, false)];
        while let Some((id, expanded)) = stack.pop() {
            if emitted.contains(&id) {
                continue;
            }
            if expanded {
                emitted.insert(id);
                if let Some(element) = snapshot.get(id) {
                    ordered.push(element);
                }
                continue;
            }
            stack.push((id, true));
            for sup in snapshot.superiors_of(id) {
                if members.contains(&sup) && !emitted.contains(&sup) {
                    stack.push((sup, false));
                }
            }
        }
    }
    ordered
}

/// Writes `contents` to `path` through a sibling temp file and rename.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub(crate) fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// fsync a directory so renames inside it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}

/// Copies `src` to `dst` and syncs the copy.
pub(crate) fn copy_synced(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst)?;
    OpenOptions::new().write(true).open(dst)?.sync_all()
}

/// Builds a catalog from every schema file in `dir`.
///
/// Elements are inserted first and linked in a second pass so that files
/// may reference elements defined in later files. Every element then goes
/// through the reference, role, obsolescence, association and cycle checks.
pub fn load_snapshot(
    dir: &Path,
    decoder: &dyn DefinitionDecoder,
    validator: &ModificationValidator,
) -> Result<SchemaSnapshot, LoadError> {
    let mut snapshot = SchemaSnapshot::with_builtins();
    let mut loaded: Vec<(ElementId, String)> = Vec::new();

    let files = list_schema_files(dir).map_err(|e| LoadError::io(dir, e))?;
    for file in &files {
        let path = dir.join(file);
        let definitions = read_definitions(&path).map_err(|e| LoadError::io(&path, e))?;

        for definition in definitions {
            let element = validator
                .decode(decoder, definition.kind, &definition.value)
                .map_err(|source| LoadError::Definition {
                    file: file.clone(),
                    line: definition.line,
                    source,
                })?;

            if !element.kind().is_modifiable() {
                let builtin = snapshot
                    .lookup(element.kind(), element.oid())
                    .is_some_and(|e| e.is_builtin());
                if builtin {
                    tracing::debug!(file = %file, oid = element.oid(), "skipping redefinition of built-in element");
                    continue;
                }
            }

            let conflicts = snapshot.find_conflicts(&element);
            if !conflicts.is_empty() {
                return Err(LoadError::Element {
                    file: file.clone(),
                    element: element.name_or_oid().to_string(),
                    source: SchemaError::Conflict {
                        kind: element.kind(),
                        element: element.name_or_oid().to_string(),
                        existing: snapshot.conflict(conflicts).existing,
                    },
                });
            }

            let id = snapshot.insert_unlinked(element, file);
            loaded.push((id, file.clone()));
        }
    }

    for (id, _) in &loaded {
        snapshot.link(*id);
    }

    for (id, file) in &loaded {
        validator
            .check_loaded(&snapshot, *id)
            .map_err(|source| LoadError::Element {
                file: file.clone(),
                element: snapshot
                    .get(*id)
                    .map(|e| e.name_or_oid().to_string())
                    .unwrap_or_default(),
                source,
            })?;
    }

    Ok(snapshot)
}
