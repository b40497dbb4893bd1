//! Schema file persistence
//!
//! - Reading schema files into a catalog at startup ([`load_snapshot`])
//! - Crash-safe rewriting of touched files ([`FilePersistenceCoordinator`])
//! - Concatenated snapshot for offline edit detection ([`ConcatSnapshotStore`])
//!
//! The schema files are authoritative on disk. All writes go through a temp
//! file, fsync and rename.

mod concat;
mod coordinator;
mod errors;
pub mod files;

pub use concat::{ConcatSnapshotStore, ConcatenatedSchema, CONCAT_BASE_NAME, CONCAT_FILE_PREFIX};
pub use coordinator::{FilePersistenceCoordinator, PersistReport, PersistState};
pub use errors::{ConcatError, LoadError, PersistOutcome, PersistenceError};
pub use files::{list_schema_files, load_snapshot, render_schema_file, SCHEMA_ENTRY_HEADER};
