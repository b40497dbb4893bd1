//! Live schema catalog
//!
//! Holds the typed schema elements of the directory server and the rules a
//! change must satisfy before it becomes visible:
//!
//! - Within a kind no two live elements share a name or OID
//! - Every reference from a non-obsolete element resolves to a defined,
//!   non-obsolete element
//! - Superior chains are acyclic
//! - Structural classes, name forms and matching rules carry at most one
//!   exclusive associate of each kind
//! - An element cannot be removed while another element references it
//!
//! Readers use the published [`SchemaSnapshot`]; writers hold the
//! [`SchemaWriteLock`].

pub mod builtins;
pub mod decoder;
pub mod element;
pub mod encoder;
mod errors;
mod lock;
pub mod modification;
pub mod repository;
pub mod validator;

pub use decoder::{DefinitionDecoder, Rfc4512Decoder};
pub use element::{
    ElementHeader, ElementId, ElementKind, ObjectClassKind, Reference, ReferenceRole,
    SchemaElement, SCHEMA_FILE_SUFFIX, USER_SCHEMA_FILE,
};
pub use errors::{SchemaError, SchemaErrorCode, SchemaResult, Severity};
pub use lock::{DirectoryLock, SchemaWriteGuard, SchemaWriteLock};
pub use modification::{Modification, ModificationType};
pub use repository::{SchemaRepository, SchemaSnapshot, StoredElement};
pub use validator::{AddPlan, ModificationValidator};
