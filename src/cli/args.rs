//! CLI argument definitions using clap
//!
//! Commands:
//! - dirschema init --config <path>
//! - dirschema check --config <path>
//! - dirschema add --kind <kind> --definition <text>
//! - dirschema remove --kind <kind> --name <name-or-oid>
//! - dirschema lookup --kind <kind> --name <name-or-oid>
//! - dirschema backup [--id <id>] [--hash] [--sign] [--encrypt]
//! - dirschema restore --id <id> [--verify-only]
//! - dirschema remove-backup --id <id>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::schema::ElementKind;

/// Directory server live schema tool
#[derive(Parser, Debug)]
#[command(name = "dirschema")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Human-readable log lines instead of JSON
    #[arg(long, global = true)]
    pub plain_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the schema, upgrade and backup directories
    Init {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
    },

    /// Load the schema files and report offline changes
    Check {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
    },

    /// Add one schema element
    Add {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        /// attribute-type, object-class, name-form, dit-content-rule,
        /// dit-structure-rule or matching-rule-use
        #[arg(long)]
        kind: ElementKind,
        /// Full definition, e.g. "( 1.2.3 NAME 'x' SUP name )"
        #[arg(long)]
        definition: String,
    },

    /// Remove one schema element
    Remove {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        #[arg(long)]
        kind: ElementKind,
        /// Name, OID or full definition
        #[arg(long)]
        name: String,
    },

    /// Show one schema element
    Lookup {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        #[arg(long)]
        kind: ElementKind,
        #[arg(long)]
        name: String,
    },

    /// Archive the schema files
    Backup {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        /// Backup ID (default: current UTC time)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        hash: bool,
        #[arg(long)]
        sign: bool,
        #[arg(long)]
        encrypt: bool,
    },

    /// Restore the schema files from a backup
    Restore {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        #[arg(long)]
        id: String,
        /// Check the archive without touching the schema directory
        #[arg(long)]
        verify_only: bool,
    },

    /// Delete a backup archive and its descriptor
    RemoveBackup {
        #[arg(long, default_value = "./dirschema.json")]
        config: PathBuf,
        #[arg(long)]
        id: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add() {
        let cli = Cli::try_parse_from([
            "dirschema",
            "add",
            "--kind",
            "object-class",
            "--definition",
            "( 1.2.3 NAME 'x' SUP top )",
        ])
        .unwrap();
        match cli.command {
            Command::Add { kind, config, .. } => {
                assert_eq!(kind, ElementKind::ObjectClass);
                assert_eq!(config, PathBuf::from("./dirschema.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_attribute_name_accepted_as_kind() {
        let cli = Cli::try_parse_from([
            "dirschema", "lookup", "--kind", "attributeTypes", "--name", "cn",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Lookup { kind: ElementKind::AttributeType, .. }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(Cli::try_parse_from([
            "dirschema", "lookup", "--kind", "widget", "--name", "cn",
        ])
        .is_err());
    }
}
