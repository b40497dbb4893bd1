//! Server configuration
//!
//! Loaded from a JSON file:
//!
//! ```json
//! {
//!   "schema_dir": "/var/lib/ds/config/schema",
//!   "backup_dir": "/var/lib/ds/bak/schema",
//!   "mac_key": "c2VjcmV0"
//! }
//! ```
//!
//! Only `schema_dir` is required. The upgrade and backup directories default
//! to siblings of the schema directory.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::crypto::{AES_GCM, HMAC_SHA256, SHA256};
use crate::backup::BackupAlgorithms;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        "DS_CONFIG_ERROR"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding the schema files (required)
    pub schema_dir: PathBuf,

    /// Concatenated snapshot directory (default `<schema_dir>/../upgrade`)
    #[serde(default)]
    pub upgrade_dir: Option<PathBuf>,

    /// Backup directory (default `<schema_dir>/../backup`)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Timestamped concatenated snapshots to keep
    #[serde(default = "default_concat_retention")]
    pub concat_retention: usize,

    #[serde(default = "default_digest_algorithm")]
    pub digest_algorithm: String,

    #[serde(default = "default_mac_algorithm")]
    pub mac_algorithm: String,

    #[serde(default = "default_cipher_algorithm")]
    pub cipher_algorithm: String,

    /// Base64 key for signed backups
    #[serde(default)]
    pub mac_key: Option<String>,

    /// Base64 AES-256 key for encrypted backups
    #[serde(default)]
    pub cipher_key: Option<String>,
}

fn default_product_name() -> String {
    "Directory Server".to_string()
}
fn default_concat_retention() -> usize {
    1
}
fn default_digest_algorithm() -> String {
    SHA256.to_string()
}
fn default_mac_algorithm() -> String {
    HMAC_SHA256.to_string()
}
fn default_cipher_algorithm() -> String {
    AES_GCM.to_string()
}

impl ServerConfig {
    /// Configuration with every default and the given schema directory.
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
            upgrade_dir: None,
            backup_dir: None,
            product_name: default_product_name(),
            concat_retention: default_concat_retention(),
            digest_algorithm: default_digest_algorithm(),
            mac_algorithm: default_mac_algorithm(),
            cipher_algorithm: default_cipher_algorithm(),
            mac_key: None,
            cipher_key: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("schema_dir", "must not be empty"));
        }
        if self.concat_retention == 0 {
            return Err(ConfigError::invalid("concat_retention", "must be > 0"));
        }
        for (field, value) in [
            ("digest_algorithm", &self.digest_algorithm),
            ("mac_algorithm", &self.mac_algorithm),
            ("cipher_algorithm", &self.cipher_algorithm),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        if let Some(key) = self.mac_key()? {
            if key.is_empty() {
                return Err(ConfigError::invalid("mac_key", "must not be empty"));
            }
        }
        if let Some(key) = self.cipher_key()? {
            if key.len() != 32 {
                return Err(ConfigError::invalid(
                    "cipher_key",
                    format!("expected 32 bytes, got {}", key.len()),
                ));
            }
        }
        Ok(())
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_dir
    }

    pub fn upgrade_path(&self) -> PathBuf {
        self.upgrade_dir
            .clone()
            .unwrap_or_else(|| self.sibling("upgrade"))
    }

    pub fn backup_path(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.sibling("backup"))
    }

    fn sibling(&self, name: &str) -> PathBuf {
        match self.schema_dir.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    pub fn algorithms(&self) -> BackupAlgorithms {
        BackupAlgorithms {
            digest: self.digest_algorithm.clone(),
            mac: self.mac_algorithm.clone(),
            cipher: self.cipher_algorithm.clone(),
        }
    }

    pub fn mac_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        decode_key("mac_key", self.mac_key.as_deref())
    }

    pub fn cipher_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        decode_key("cipher_key", self.cipher_key.as_deref())
    }
}

fn decode_key(field: &'static str, value: Option<&str>) -> Result<Option<Vec<u8>>, ConfigError> {
    value
        .map(|v| {
            STANDARD
                .decode(v.trim())
                .map_err(|e| ConfigError::invalid(field, format!("invalid base64: {}", e)))
        })
        .transpose()
}
