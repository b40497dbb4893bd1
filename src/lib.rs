//! dirschema - live schema subsystem of a directory server
//!
//! - [`schema`]: typed schema elements, the published catalog and the
//!   modification validator
//! - [`handler`]: modify requests against the subschema entry
//! - [`persistence`]: crash-safe rewriting of the schema files and the
//!   concatenated snapshot used for offline change detection
//! - [`backup`] / [`restore`]: archived copies of the schema directory
//! - [`server`]: the server root tying them together

pub mod backup;
pub mod cli;
pub mod config;
pub mod fault;
pub mod handler;
pub mod observability;
pub mod persistence;
pub mod restore;
pub mod schema;
pub mod server;
