//! Modify requests and their parsed form

use serde::{Deserialize, Serialize};

use crate::schema::{
    DefinitionDecoder, ElementKind, Modification, ModificationType, ModificationValidator,
    SchemaElement, SchemaError, SchemaResult,
};

/// A modify request against the subschema entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyRequest {
    /// Authenticated principal issuing the request.
    pub principal: String,
    pub modifications: Vec<Modification>,
}

impl ModifyRequest {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            modifications: Vec::new(),
        }
    }

    pub fn with(mut self, modification: Modification) -> Self {
        self.modifications.push(modification);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }
}

/// One value of a modification, decoded.
#[derive(Debug, Clone)]
pub enum Change {
    Add(SchemaElement),
    /// Target is an OID extracted from a full definition, or a bare name/OID.
    Delete { kind: ElementKind, target: String },
}

impl Change {
    pub fn kind(&self) -> ElementKind {
        match self {
            Change::Add(element) => element.kind(),
            Change::Delete { kind, .. } => *kind,
        }
    }
}

/// Flattens a request into single-element changes, in request order.
///
/// Only add and delete of the modifiable kinds are accepted, and a delete
/// must name the values it removes.
pub fn parse_request(
    request: &ModifyRequest,
    decoder: &dyn DefinitionDecoder,
    validator: &ModificationValidator,
) -> SchemaResult<Vec<Change>> {
    let mut changes = Vec::new();

    for modification in &request.modifications {
        let kind = modification
            .kind()
            .filter(ElementKind::is_modifiable)
            .ok_or_else(|| {
                SchemaError::UnsupportedOperation(format!(
                    "attribute '{}' cannot be modified",
                    modification.attribute
                ))
            })?;

        match modification.mod_type {
            ModificationType::Add | ModificationType::Delete if modification.values.is_empty() => {
                return Err(SchemaError::UnsupportedOperation(format!(
                    "{} of {} requires at least one value",
                    modification.mod_type, modification.attribute
                )));
            }
            ModificationType::Add => {
                for value in &modification.values {
                    changes.push(Change::Add(validator.decode(decoder, kind, value)?));
                }
            }
            ModificationType::Delete => {
                for value in &modification.values {
                    let value = value.trim();
                    let target = if value.starts_with('(') {
                        decoder.extract_oid(kind, value).map_err(|err| match err {
                            SchemaError::Decode { .. } => err,
                            other => SchemaError::Decode {
                                kind,
                                reason: other.to_string(),
                            },
                        })?
                    } else {
                        value.to_string()
                    };
                    changes.push(Change::Delete { kind, target });
                }
            }
            other => {
                return Err(SchemaError::UnsupportedOperation(format!(
                    "{} of {} is not supported; use delete followed by add",
                    other, modification.attribute
                )));
            }
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Rfc4512Decoder, SchemaErrorCode};

    fn parse(request: &ModifyRequest) -> SchemaResult<Vec<Change>> {
        parse_request(request, &Rfc4512Decoder::new(), &ModificationValidator::new())
    }

    #[test]
    fn test_replace_is_unsupported() {
        let request = ModifyRequest::new("admin").with(Modification::new(
            "attributeTypes",
            ModificationType::Replace,
            ["( 1.2 NAME 'x' SUP name )"],
        ));
        let err = parse(&request).unwrap_err();
        assert_eq!(err.code(), SchemaErrorCode::DsSchemaUnsupportedOperation);
    }

    #[test]
    fn test_delete_all_values_is_unsupported() {
        let request = ModifyRequest::new("admin").with(Modification::new(
            "objectClasses",
            ModificationType::Delete,
            Vec::<String>::new(),
        ));
        assert!(matches!(
            parse(&request),
            Err(SchemaError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_read_only_kinds_rejected() {
        let request = ModifyRequest::new("admin").with(Modification::new(
            "ldapSyntaxes",
            ModificationType::Add,
            ["( 1.2.3 DESC 'x' )"],
        ));
        assert!(matches!(
            parse(&request),
            Err(SchemaError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_delete_by_definition_or_name() {
        let request = ModifyRequest::new("admin")
            .with(Modification::delete(
                ElementKind::AttributeType,
                "( 1.2.3.4 NAME 'x' SUP name )",
            ))
            .with(Modification::delete(ElementKind::AttributeType, "cn"));
        let changes = parse(&request).unwrap();
        assert!(matches!(&changes[0], Change::Delete { target, .. } if target == "1.2.3.4"));
        assert!(matches!(&changes[1], Change::Delete { target, .. } if target == "cn"));
    }

    #[test]
    fn test_malformed_add_is_decode_error() {
        let request = ModifyRequest::new("admin")
            .with(Modification::add(ElementKind::ObjectClass, "( 1.2 NAME "));
        assert_eq!(
            parse(&request).unwrap_err().code(),
            SchemaErrorCode::DsSchemaDecode
        );
    }
}
