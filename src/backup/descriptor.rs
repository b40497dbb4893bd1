//! Backup descriptors
//!
//! Each backup is described by a [`BackupDescriptor`]:
//! - id: backup identifier, unique within its backup directory
//! - created_at: UTC creation time
//! - encrypted: whether the archive is wrapped by a cipher
//! - unsigned_hash / signed_hash: base64 digest or MAC of the archived files
//! - properties: archive file name and algorithm names
//!
//! All descriptors of a backup directory live in `backup.info` (JSON).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{BackupError, BackupResult};
use crate::persistence::files::write_atomically;

pub const BACKUP_INFO_FILE: &str = "backup.info";

pub const PROP_ARCHIVE_FILE: &str = "archive_file";
pub const PROP_DIGEST_ALGORITHM: &str = "digest_algorithm";
pub const PROP_MAC_ALGORITHM: &str = "mac_algorithm";
pub const PROP_CIPHER_ALGORITHM: &str = "cipher_algorithm";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupDescriptor {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_hash: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl BackupDescriptor {
    pub fn new(id: impl Into<String>, archive_file: impl Into<String>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(PROP_ARCHIVE_FILE.to_string(), archive_file.into());
        Self {
            id: id.into(),
            created_at: Utc::now(),
            encrypted: false,
            unsigned_hash: None,
            signed_hash: None,
            properties,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn archive_file(&self) -> Option<&str> {
        self.property(PROP_ARCHIVE_FILE)
    }

    pub fn set_unsigned_hash(&mut self, digest: &[u8]) {
        self.unsigned_hash = Some(BASE64.encode(digest));
    }

    pub fn set_signed_hash(&mut self, mac: &[u8]) {
        self.signed_hash = Some(BASE64.encode(mac));
    }

    pub fn unsigned_hash_bytes(&self) -> BackupResult<Option<Vec<u8>>> {
        decode_hash(&self.id, "unsigned hash", self.unsigned_hash.as_deref())
    }

    pub fn signed_hash_bytes(&self) -> BackupResult<Option<Vec<u8>>> {
        decode_hash(&self.id, "signed hash", self.signed_hash.as_deref())
    }
}

fn decode_hash(id: &str, what: &str, value: Option<&str>) -> BackupResult<Option<Vec<u8>>> {
    value
        .map(|v| {
            BASE64.decode(v).map_err(|e| {
                BackupError::descriptor(format!("backup '{}' has an invalid {}: {}", id, what, e))
            })
        })
        .transpose()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BackupInfo {
    backups: Vec<BackupDescriptor>,
}

/// Descriptors of all backups in one backup directory.
#[derive(Debug)]
pub struct BackupDirectory {
    path: PathBuf,
    backups: Vec<BackupDescriptor>,
}

impl BackupDirectory {
    /// Reads `backup.info`; a missing file is an empty directory.
    pub fn open(path: &Path) -> BackupResult<Self> {
        let info_path = path.join(BACKUP_INFO_FILE);
        let info = match fs::read_to_string(&info_path) {
            Ok(text) => serde_json::from_str::<BackupInfo>(&text).map_err(|e| {
                BackupError::descriptor(format!(
                    "Failed to parse {}: {}",
                    info_path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BackupInfo::default(),
            Err(e) => return Err(BackupError::io_error_at_path(&info_path, e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            backups: info.backups,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &[BackupDescriptor] {
        &self.backups
    }

    pub fn get(&self, id: &str) -> Option<&BackupDescriptor> {
        self.backups.iter().find(|b| b.id == id)
    }

    pub fn add(&mut self, descriptor: BackupDescriptor) -> BackupResult<()> {
        if self.get(&descriptor.id).is_some() {
            return Err(BackupError::duplicate_id(&descriptor.id, &self.path));
        }
        self.backups.push(descriptor);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<BackupDescriptor> {
        let pos = self.backups.iter().position(|b| b.id == id)?;
        Some(self.backups.remove(pos))
    }

    pub fn save(&self) -> BackupResult<()> {
        let info = BackupInfo {
            backups: self.backups.clone(),
        };
        let json = serde_json::to_string_pretty(&info).map_err(|e| {
            BackupError::descriptor(format!("Failed to serialize backup descriptors: {}", e))
        })?;
        let info_path = self.path.join(BACKUP_INFO_FILE);
        write_atomically(&info_path, json.as_bytes())
            .map_err(|e| BackupError::io_error_at_path(&info_path, e))
    }
}
