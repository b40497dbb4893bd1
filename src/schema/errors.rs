//! Schema error types
//!
//! Error codes:
//! - DS_SCHEMA_DECODE (REJECT)
//! - DS_SCHEMA_CONFLICT (REJECT)
//! - DS_SCHEMA_UNDEFINED_REFERENCE (REJECT)
//! - DS_SCHEMA_NOT_STRUCTURAL (REJECT)
//! - DS_SCHEMA_NOT_AUXILIARY (REJECT)
//! - DS_SCHEMA_OBSOLETE_REFERENCE (REJECT)
//! - DS_SCHEMA_DUPLICATE_ASSOCIATION (REJECT)
//! - DS_SCHEMA_CIRCULAR_REFERENCE (REJECT)
//! - DS_SCHEMA_DEPENDENTS_EXIST (REJECT)
//! - DS_SCHEMA_NOT_FOUND (REJECT)
//! - DS_SCHEMA_UNSUPPORTED_OPERATION (REJECT)
//! - DS_SCHEMA_INSUFFICIENT_PRIVILEGE (REJECT)
//! - DS_SCHEMA_PERSISTENCE (ERROR, FATAL when files were left inconsistent)
//!
//! Every REJECT error is raised before the repository is touched.

use std::fmt;

use thiserror::Error;

use super::element::{ElementKind, ReferenceRole};
use crate::persistence::{PersistOutcome, PersistenceError};

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Severity levels for schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Request rejected, nothing changed
    Reject,
    /// Operation failed after the change was applied in memory
    Error,
    /// Operator intervention required
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Reject => write!(f, "REJECT"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Schema error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    DsSchemaDecode,
    DsSchemaConflict,
    DsSchemaUndefinedReference,
    DsSchemaNotStructural,
    DsSchemaNotAuxiliary,
    DsSchemaObsoleteReference,
    DsSchemaDuplicateAssociation,
    DsSchemaCircularReference,
    DsSchemaDependentsExist,
    DsSchemaNotFound,
    DsSchemaUnsupportedOperation,
    DsSchemaInsufficientPrivilege,
    DsSchemaPersistence,
}

impl SchemaErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::DsSchemaDecode => "DS_SCHEMA_DECODE",
            SchemaErrorCode::DsSchemaConflict => "DS_SCHEMA_CONFLICT",
            SchemaErrorCode::DsSchemaUndefinedReference => "DS_SCHEMA_UNDEFINED_REFERENCE",
            SchemaErrorCode::DsSchemaNotStructural => "DS_SCHEMA_NOT_STRUCTURAL",
            SchemaErrorCode::DsSchemaNotAuxiliary => "DS_SCHEMA_NOT_AUXILIARY",
            SchemaErrorCode::DsSchemaObsoleteReference => "DS_SCHEMA_OBSOLETE_REFERENCE",
            SchemaErrorCode::DsSchemaDuplicateAssociation => "DS_SCHEMA_DUPLICATE_ASSOCIATION",
            SchemaErrorCode::DsSchemaCircularReference => "DS_SCHEMA_CIRCULAR_REFERENCE",
            SchemaErrorCode::DsSchemaDependentsExist => "DS_SCHEMA_DEPENDENTS_EXIST",
            SchemaErrorCode::DsSchemaNotFound => "DS_SCHEMA_NOT_FOUND",
            SchemaErrorCode::DsSchemaUnsupportedOperation => "DS_SCHEMA_UNSUPPORTED_OPERATION",
            SchemaErrorCode::DsSchemaInsufficientPrivilege => "DS_SCHEMA_INSUFFICIENT_PRIVILEGE",
            SchemaErrorCode::DsSchemaPersistence => "DS_SCHEMA_PERSISTENCE",
        }
    }
}

impl fmt::Display for SchemaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Schema modification errors
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Definition text could not be decoded
    #[error("Invalid {kind} definition: {reason}")]
    Decode { kind: ElementKind, reason: String },

    /// Name or OID already used by one or two existing elements
    #[error("{}", describe_conflict(.kind, .element, .existing))]
    Conflict {
        kind: ElementKind,
        element: String,
        existing: Vec<String>,
    },

    #[error("{kind} '{element}' references undefined {target_kind} '{target}'")]
    UndefinedReference {
        kind: ElementKind,
        element: String,
        target_kind: ElementKind,
        target: String,
    },

    #[error("{kind} '{element}' requires structural object class but '{class}' is not STRUCTURAL")]
    NotStructural {
        kind: ElementKind,
        element: String,
        class: String,
    },

    #[error("{kind} '{element}' lists auxiliary class '{class}' which is not AUXILIARY")]
    NotAuxiliary {
        kind: ElementKind,
        element: String,
        class: String,
    },

    #[error("{kind} '{element}' is not obsolete but references obsolete {target_kind} '{target}'")]
    ObsoleteReference {
        kind: ElementKind,
        element: String,
        target_kind: ElementKind,
        target: String,
    },

    /// Exclusive association already claimed by another element
    #[error(
        "{kind} '{element}' conflicts with existing {kind} '{existing}': both are associated with {target_kind} '{target}'"
    )]
    DuplicateAssociation {
        kind: ElementKind,
        element: String,
        existing: String,
        target_kind: ElementKind,
        target: String,
    },

    #[error("{kind} '{element}' would create a circular superior chain")]
    CircularReference { kind: ElementKind, element: String },

    /// Element still referenced by another live element
    #[error(
        "{kind} '{element}' cannot be removed because it is the {} of {dependent_kind} '{dependent}'",
        describe_role(.role)
    )]
    DependentsExist {
        kind: ElementKind,
        element: String,
        dependent_kind: ElementKind,
        dependent: String,
        role: ReferenceRole,
    },

    #[error("{kind} '{name}' is not defined")]
    NotFound { kind: ElementKind, name: String },

    #[error("Unsupported schema modification: {0}")]
    UnsupportedOperation(String),

    #[error("Insufficient privilege: '{privilege}' is required to modify the schema")]
    InsufficientPrivilege { privilege: String },

    /// Change applied in memory but not durably persisted
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl SchemaError {
    pub fn code(&self) -> SchemaErrorCode {
        match self {
            SchemaError::Decode { .. } => SchemaErrorCode::DsSchemaDecode,
            SchemaError::Conflict { .. } => SchemaErrorCode::DsSchemaConflict,
            SchemaError::UndefinedReference { .. } => SchemaErrorCode::DsSchemaUndefinedReference,
            SchemaError::NotStructural { .. } => SchemaErrorCode::DsSchemaNotStructural,
            SchemaError::NotAuxiliary { .. } => SchemaErrorCode::DsSchemaNotAuxiliary,
            SchemaError::ObsoleteReference { .. } => SchemaErrorCode::DsSchemaObsoleteReference,
            SchemaError::DuplicateAssociation { .. } => {
                SchemaErrorCode::DsSchemaDuplicateAssociation
            }
            SchemaError::CircularReference { .. } => SchemaErrorCode::DsSchemaCircularReference,
            SchemaError::DependentsExist { .. } => SchemaErrorCode::DsSchemaDependentsExist,
            SchemaError::NotFound { .. } => SchemaErrorCode::DsSchemaNotFound,
            SchemaError::UnsupportedOperation(_) => SchemaErrorCode::DsSchemaUnsupportedOperation,
            SchemaError::InsufficientPrivilege { .. } => {
                SchemaErrorCode::DsSchemaInsufficientPrivilege
            }
            SchemaError::Persistence(_) => SchemaErrorCode::DsSchemaPersistence,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SchemaError::Persistence(err) if err.outcome() == PersistOutcome::NotRestored => {
                Severity::Fatal
            }
            SchemaError::Persistence(_) => Severity::Error,
            _ => Severity::Reject,
        }
    }

    /// Whether the in-memory schema already reflects the requested change.
    pub fn is_applied(&self) -> bool {
        matches!(self, SchemaError::Persistence(_))
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

fn describe_role(role: &ReferenceRole) -> &'static str {
    role.describe()
}

fn describe_conflict(kind: &ElementKind, element: &str, existing: &[String]) -> String {
    match existing {
        [one] => format!(
            "{} '{}' conflicts with existing {} '{}'",
            kind, element, kind, one
        ),
        [first, second, ..] => format!(
            "{} '{}' conflicts with multiple existing elements: {} '{}' and {} '{}'",
            kind, element, kind, first, kind, second
        ),
        [] => format!("{} '{}' conflicts with an existing element", kind, element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_one_or_two() {
        let one = SchemaError::Conflict {
            kind: ElementKind::AttributeType,
            element: "mail".into(),
            existing: vec!["rfc822Mailbox".into()],
        };
        assert!(one.to_string().contains("'rfc822Mailbox'"));

        let two = SchemaError::Conflict {
            kind: ElementKind::AttributeType,
            element: "mail".into(),
            existing: vec!["a".into(), "b".into()],
        };
        let msg = two.to_string();
        assert!(msg.contains("multiple"));
        assert!(msg.contains("'a'") && msg.contains("'b'"));
    }

    #[test]
    fn test_dependents_message_uses_role_wording() {
        let err = SchemaError::DependentsExist {
            kind: ElementKind::AttributeType,
            element: "cn".into(),
            dependent_kind: ElementKind::ObjectClass,
            dependent: "person".into(),
            role: ReferenceRole::RequiredInObjectClass,
        };
        assert_eq!(
            err.to_string(),
            "attribute type 'cn' cannot be removed because it is the required attribute of object class 'person'"
        );
        assert_eq!(err.code().code(), "DS_SCHEMA_DEPENDENTS_EXIST");
        assert_eq!(err.severity(), Severity::Reject);
        assert!(!err.is_applied());
    }

    #[test]
    fn test_validation_errors_are_rejects() {
        let err = SchemaError::CircularReference {
            kind: ElementKind::ObjectClass,
            element: "a".into(),
        };
        assert_eq!(err.severity(), Severity::Reject);
        assert!(!err.is_fatal());
    }
}
