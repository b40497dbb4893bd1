//! Shared fixtures for integration tests
//!
//! Every fixture lives in its own temporary directory laid out the way
//! `dirschema init` lays it out:
//!
//! ```text
//! <tmp>/schema/00-core.ldif
//! <tmp>/upgrade/schema.ldif.base
//! <tmp>/backup/
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use dirschema::config::ServerConfig;
use dirschema::fault::FaultInjector;
use dirschema::handler::{Privilege, StaticPrivileges};
use dirschema::observability::MemoryAlertNotifier;
use dirschema::server::{SchemaServer, ServerContext};
use tempfile::TempDir;

pub const ADMIN: &str = "cn=Directory Manager";

pub const CORE_SCHEMA: &str = "\
# core schema used by the integration tests
dn: cn=schema
objectClass: top
objectClass: ldapSubentry
objectClass: subschema
attributeTypes: ( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch
  SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 X-SCHEMA-FILE '00-core.ldif' )
attributeTypes: ( 2.5.4.0 NAME 'objectClass' EQUALITY objectIdentifierMatch
  SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 X-SCHEMA-FILE '00-core.ldif' )
attributeTypes: ( 2.5.4.3 NAME 'cn' SUP name X-SCHEMA-FILE '00-core.ldif' )
attributeTypes: ( 2.5.4.4 NAME 'sn' SUP name X-SCHEMA-FILE '00-core.ldif' )
attributeTypes: ( 2.5.4.13 NAME 'description' SUP name X-SCHEMA-FILE '00-core.ldif' )
objectClasses: ( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass X-SCHEMA-FILE '00-core.ldif' )
objectClasses: ( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn )
  MAY description X-SCHEMA-FILE '00-core.ldif' )
objectClasses: ( 1.3.6.1.4.1.9.1 NAME 'extensibleExtra' SUP top AUXILIARY
  MAY description X-SCHEMA-FILE '00-core.ldif' )
";

pub struct Fixture {
    pub root: TempDir,
    pub config: ServerConfig,
    pub alerts: MemoryAlertNotifier,
    pub faults: FaultInjector,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Fixture whose configuration is adjusted by `customize` before init.
    pub fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ServerConfig::new(root.path().join("schema"));
        customize(&mut config);

        fs::create_dir_all(config.schema_path()).unwrap();
        fs::write(config.schema_path().join("00-core.ldif"), CORE_SCHEMA).unwrap();
        SchemaServer::init(&config).unwrap();

        Self {
            root,
            config,
            alerts: MemoryAlertNotifier::new(),
            faults: FaultInjector::new(),
        }
    }

    pub fn schema_dir(&self) -> &Path {
        self.config.schema_path()
    }

    pub fn open(&self) -> SchemaServer {
        SchemaServer::open_with(self.config.clone(), self.context()).unwrap()
    }

    pub fn context(&self) -> ServerContext {
        ServerContext {
            privileges: Arc::new(StaticPrivileges::new().grant(ADMIN, Privilege::ModifySchema)),
            alerts: Arc::new(self.alerts.clone()),
            faults: self.faults.clone(),
        }
    }

    pub fn read_schema_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.schema_dir().join(name)).ok()
    }

    /// File name to content for every file in the schema directory.
    pub fn schema_files(&self) -> BTreeMap<String, Vec<u8>> {
        read_dir_contents(self.schema_dir())
    }

    /// Entries of the fixture root whose name contains `marker`.
    pub fn siblings_containing(&self, marker: &str) -> Vec<String> {
        fs::read_dir(self.root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(marker))
            .collect()
    }
}

pub fn read_dir_contents(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.path().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().into_owned(),
                fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}
