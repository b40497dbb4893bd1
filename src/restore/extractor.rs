//! Archive extraction for restore
//!
//! - Stream archive entries without unpacking blindly
//! - Only plain file names are accepted as entries
//! - Move the live schema directory aside and put it back on failure

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tar::Archive;

use super::errors::{RestoreError, RestoreResult};
use crate::backup::COMMENT_ENTRY;
use crate::fault::{points, FaultInjector};

/// Calls `f` for every schema file entry in archive order and returns the
/// backup comment.
pub fn for_each_entry<F>(bytes: &[u8], mut f: F) -> RestoreResult<Option<String>>
where
    F: FnMut(&str, &[u8]) -> RestoreResult<()>,
{
    let invalid = |e: io::Error| RestoreError::invalid_backup(format!("unreadable archive: {}", e));

    let mut archive = Archive::new(bytes);
    let mut comment = None;

    for entry in archive.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        let name = entry
            .path()
            .map_err(invalid)?
            .to_string_lossy()
            .into_owned();

        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with("..") {
            return Err(RestoreError::invalid_backup(format!(
                "archive entry '{}' is not a plain file name",
                name
            )));
        }

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content).map_err(invalid)?;

        if name == COMMENT_ENTRY {
            comment = Some(String::from_utf8_lossy(&content).into_owned());
            continue;
        }
        f(&name, &content)?;
    }

    Ok(comment)
}

/// First unused `<schema_dir>.save`, `.save2`, `.save3`, ... sibling.
pub fn save_path(schema_dir: &Path) -> RestoreResult<PathBuf> {
    let name = schema_dir
        .file_name()
        .ok_or_else(|| RestoreError::failed("Invalid schema directory name"))?
        .to_string_lossy()
        .into_owned();

    let mut candidate = schema_dir.with_file_name(format!("{}.save", name));
    let mut n = 2;
    while candidate.exists() {
        candidate = schema_dir.with_file_name(format!("{}.save{}", name, n));
        n += 1;
    }
    Ok(candidate)
}

pub fn write_entry(dir: &Path, name: &str, content: &[u8], faults: &FaultInjector) -> io::Result<()> {
    faults.check(points::RESTORE_WRITE_FILE)?;
    let mut file = File::create(dir.join(name))?;
    file.write_all(content)?;
    file.sync_all()
}

/// Deletes the partially restored directory and renames the saved one back.
pub fn put_back(schema_dir: &Path, saved: &Path) -> io::Result<()> {
    if schema_dir.exists() {
        fs::remove_dir_all(schema_dir)?;
    }
    fs::rename(saved, schema_dir)?;
    sync_parent(schema_dir)
}

pub fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}
