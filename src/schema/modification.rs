//! Schema modifications
//!
//! A modification targets one subschema attribute (`attributeTypes`,
//! `objectClasses`, ...) and carries one or more definition values. The same
//! type describes client modify requests and the differences found between
//! the schema files and the concatenated snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::element::ElementKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationType {
    Add,
    Delete,
    Replace,
    Increment,
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModificationType::Add => "add",
            ModificationType::Delete => "delete",
            ModificationType::Replace => "replace",
            ModificationType::Increment => "increment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub attribute: String,
    #[serde(rename = "type")]
    pub mod_type: ModificationType,
    pub values: Vec<String>,
}

impl Modification {
    pub fn new(
        attribute: impl Into<String>,
        mod_type: ModificationType,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            mod_type,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add(kind: ElementKind, definition: impl Into<String>) -> Self {
        Self::new(kind.attribute_name(), ModificationType::Add, [definition.into()])
    }

    pub fn delete(kind: ElementKind, definition: impl Into<String>) -> Self {
        Self::new(kind.attribute_name(), ModificationType::Delete, [definition.into()])
    }

    pub fn kind(&self) -> Option<ElementKind> {
        ElementKind::from_attribute_name(&self.attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modification_targets_kind() {
        let m = Modification::add(ElementKind::NameForm, "( 1.2 NAME 'nf' OC person MUST cn )");
        assert_eq!(m.attribute, "nameForms");
        assert_eq!(m.kind(), Some(ElementKind::NameForm));
        assert_eq!(m.values.len(), 1);
    }

    #[test]
    fn test_modification_json_shape() {
        let m = Modification::delete(ElementKind::AttributeType, "cn");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "delete");
        assert_eq!(json["attribute"], "attributeTypes");
    }
}
