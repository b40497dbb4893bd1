//! CLI command implementations
//!
//! Each command loads the configuration, opens the schema server when it
//! needs one, performs one operation and returns the JSON payload for the
//! success response. Mutations run as [`ROOT_PRINCIPAL`].

use std::path::Path;

use serde_json::{json, Value};

use crate::backup::BackupOptions;
use crate::config::ServerConfig;
use crate::observability::Event;
use crate::schema::encoder::encode;
use crate::schema::{ElementKind, SchemaError};
use crate::server::{SchemaServer, ServerError, ROOT_PRINCIPAL};

use super::args::Command;
use super::errors::CliResult;

pub fn run_command(command: Command) -> CliResult<Value> {
    match command {
        Command::Init { config } => init(&config),
        Command::Check { config } => check(&config),
        Command::Add {
            config,
            kind,
            definition,
        } => add(&config, kind, &definition),
        Command::Remove { config, kind, name } => remove(&config, kind, &name),
        Command::Lookup { config, kind, name } => lookup(&config, kind, &name),
        Command::Backup {
            config,
            id,
            hash,
            sign,
            encrypt,
        } => backup(
            &config,
            BackupOptions {
                id,
                hash,
                sign,
                encrypt,
            },
        ),
        Command::Restore {
            config,
            id,
            verify_only,
        } => restore(&config, &id, verify_only),
        Command::RemoveBackup { config, id } => remove_backup(&config, &id),
    }
}

fn load_config(path: &Path) -> CliResult<ServerConfig> {
    let config = ServerConfig::load(path)?;
    tracing::info!(
        event = Event::ConfigLoaded.as_str(),
        path = %path.display(),
        "configuration loaded"
    );
    Ok(config)
}

fn open(path: &Path) -> CliResult<SchemaServer> {
    Ok(SchemaServer::open(load_config(path)?)?)
}

pub fn init(config_path: &Path) -> CliResult<Value> {
    let config = load_config(config_path)?;
    SchemaServer::init(&config)?;
    Ok(json!({
        "schema_dir": config.schema_path().display().to_string(),
        "upgrade_dir": config.upgrade_path().display().to_string(),
        "backup_dir": config.backup_path().display().to_string(),
    }))
}

pub fn check(config_path: &Path) -> CliResult<Value> {
    let server = open(config_path)?;
    let snapshot = server.snapshot();
    Ok(json!({
        "generation": snapshot.generation(),
        "elements": snapshot.len(),
        "schema_files": snapshot.schema_files(),
        "offline_changes": server.offline_changes(),
    }))
}

pub fn add(config_path: &Path, kind: ElementKind, definition: &str) -> CliResult<Value> {
    let server = open(config_path)?;
    let outcome = server.add(ROOT_PRINCIPAL, kind, definition)?;
    Ok(serde_json::to_value(outcome)?)
}

pub fn remove(config_path: &Path, kind: ElementKind, name: &str) -> CliResult<Value> {
    let server = open(config_path)?;
    let outcome = server.remove(ROOT_PRINCIPAL, kind, name)?;
    Ok(serde_json::to_value(outcome)?)
}

pub fn lookup(config_path: &Path, kind: ElementKind, name: &str) -> CliResult<Value> {
    let server = open(config_path)?;
    let stored = server.lookup(kind, name).ok_or_else(|| {
        ServerError::from(SchemaError::NotFound {
            kind,
            name: name.to_string(),
        })
    })?;
    let dependents: Vec<Value> = server
        .repository()
        .dependents_of(kind, name)
        .into_iter()
        .map(|(element, role)| {
            json!({
                "kind": element.kind().cli_name(),
                "name": element.name_or_oid(),
                "role": role.describe(),
            })
        })
        .collect();

    Ok(json!({
        "kind": kind.cli_name(),
        "oid": stored.element.oid(),
        "definition": encode(&stored.element),
        "schema_file": stored.schema_file,
        "dependents": dependents,
    }))
}

pub fn backup(config_path: &Path, options: BackupOptions) -> CliResult<Value> {
    let server = open(config_path)?;
    let descriptor = server.backup(&options)?;
    Ok(serde_json::to_value(descriptor)?)
}

pub fn restore(config_path: &Path, backup_id: &str, verify_only: bool) -> CliResult<Value> {
    let server = open(config_path)?;
    let report = server.restore_or_verify(backup_id, verify_only)?;
    Ok(json!({
        "backup_id": report.backup_id,
        "verify_only": report.verify_only,
        "comment": report.comment,
        "files": report.files,
        "generation": server.repository().generation(),
    }))
}

pub fn remove_backup(config_path: &Path, backup_id: &str) -> CliResult<Value> {
    let server = open(config_path)?;
    server.remove_backup(backup_id)?;
    Ok(json!({ "removed": backup_id }))
}
