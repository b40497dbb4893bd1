//! Schema element model
//!
//! Every element kind the catalog knows about is one variant of the closed
//! [`SchemaElement`] union. Elements refer to each other by the name or OID
//! written in their definition; the repository resolves those references to
//! stable [`ElementId`]s when the element is registered.
//!
//! Only six kinds can be changed at runtime. Syntaxes and matching rules are
//! read-only: they come from the built-in catalog and from schema files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Extension recording the schema file an element belongs to.
pub const SCHEMA_FILE_EXTENSION: &str = "X-SCHEMA-FILE";

/// Suffix of every schema file the loader reads.
pub const SCHEMA_FILE_SUFFIX: &str = ".ldif";

/// File receiving elements that do not name a schema file.
pub const USER_SCHEMA_FILE: &str = "99-user.ldif";

/// Pseudo file name for the built-in syntaxes and matching rules.
/// Elements in this file are never written to disk.
pub const BUILTIN_SCHEMA_FILE: &str = "<builtin>";

/// Stable internal identifier of a registered element.
///
/// IDs are allocated monotonically and survive in-place replacement, so
/// allocation order doubles as registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u64);

impl ElementId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of schema elements.
///
/// Declaration order is the order elements are written to schema files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Syntax,
    MatchingRule,
    AttributeType,
    ObjectClass,
    NameForm,
    DitContentRule,
    DitStructureRule,
    MatchingRuleUse,
}

impl ElementKind {
    /// Kinds that can be added or removed through a schema modify request.
    pub const MODIFIABLE: [ElementKind; 6] = [
        ElementKind::AttributeType,
        ElementKind::ObjectClass,
        ElementKind::NameForm,
        ElementKind::DitContentRule,
        ElementKind::DitStructureRule,
        ElementKind::MatchingRuleUse,
    ];

    /// All kinds in file order.
    pub const ALL: [ElementKind; 8] = [
        ElementKind::Syntax,
        ElementKind::MatchingRule,
        ElementKind::AttributeType,
        ElementKind::ObjectClass,
        ElementKind::NameForm,
        ElementKind::DitContentRule,
        ElementKind::DitStructureRule,
        ElementKind::MatchingRuleUse,
    ];

    pub fn is_modifiable(&self) -> bool {
        !matches!(self, ElementKind::Syntax | ElementKind::MatchingRule)
    }

    /// Human-readable kind name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Syntax => "syntax",
            ElementKind::MatchingRule => "matching rule",
            ElementKind::AttributeType => "attribute type",
            ElementKind::ObjectClass => "object class",
            ElementKind::NameForm => "name form",
            ElementKind::DitContentRule => "DIT content rule",
            ElementKind::DitStructureRule => "DIT structure rule",
            ElementKind::MatchingRuleUse => "matching rule use",
        }
    }

    /// Subschema attribute holding definitions of this kind.
    pub fn attribute_name(&self) -> &'static str {
        match self {
            ElementKind::Syntax => "ldapSyntaxes",
            ElementKind::MatchingRule => "matchingRules",
            ElementKind::AttributeType => "attributeTypes",
            ElementKind::ObjectClass => "objectClasses",
            ElementKind::NameForm => "nameForms",
            ElementKind::DitContentRule => "dITContentRules",
            ElementKind::DitStructureRule => "dITStructureRules",
            ElementKind::MatchingRuleUse => "matchingRuleUse",
        }
    }

    /// Maps a subschema attribute name (case-insensitive) to its kind.
    pub fn from_attribute_name(name: &str) -> Option<Self> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.attribute_name().eq_ignore_ascii_case(name.trim()))
    }

    /// Short command-line name (`attribute-type`, `object-class`, ...).
    pub fn cli_name(&self) -> &'static str {
        match self {
            ElementKind::Syntax => "syntax",
            ElementKind::MatchingRule => "matching-rule",
            ElementKind::AttributeType => "attribute-type",
            ElementKind::ObjectClass => "object-class",
            ElementKind::NameForm => "name-form",
            ElementKind::DitContentRule => "dit-content-rule",
            ElementKind::DitStructureRule => "dit-structure-rule",
            ElementKind::MatchingRuleUse => "matching-rule-use",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    /// Accepts either the command-line name or the subschema attribute name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.cli_name().eq_ignore_ascii_case(s.trim()))
            .or_else(|| ElementKind::from_attribute_name(s))
            .ok_or_else(|| format!("unknown schema element kind '{}'", s))
    }
}

/// `X-` extension carried by a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub values: Vec<String>,
}

/// Fields shared by every element kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementHeader {
    /// Numeric OID, or the rule ID for DIT structure rules.
    pub oid: String,
    pub names: Vec<String>,
    pub description: Option<String>,
    pub obsolete: bool,
    pub extensions: Vec<Extension>,
}

impl ElementHeader {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            ..Self::default()
        }
    }

    /// First name, or the OID when the element is unnamed.
    pub fn name_or_oid(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn extension(&self, name: &str) -> Option<&Extension> {
        self.extensions
            .iter()
            .find(|ext| ext.name.eq_ignore_ascii_case(name))
    }

    /// Schema file named by the `X-SCHEMA-FILE` extension, if any.
    pub fn schema_file(&self) -> Option<&str> {
        self.extension(SCHEMA_FILE_EXTENSION)
            .and_then(|ext| ext.values.first())
            .map(String::as_str)
    }
}

/// Kind of an object class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectClassKind {
    #[default]
    Structural,
    Auxiliary,
    Abstract,
}

impl ObjectClassKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectClassKind::Structural => "STRUCTURAL",
            ObjectClassKind::Auxiliary => "AUXILIARY",
            ObjectClassKind::Abstract => "ABSTRACT",
        }
    }
}

/// Usage of an attribute type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeUsage {
    #[default]
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    DsaOperation,
}

impl AttributeUsage {
    pub fn keyword(&self) -> &'static str {
        match self {
            AttributeUsage::UserApplications => "userApplications",
            AttributeUsage::DirectoryOperation => "directoryOperation",
            AttributeUsage::DistributedOperation => "distributedOperation",
            AttributeUsage::DsaOperation => "dSAOperation",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        [
            AttributeUsage::UserApplications,
            AttributeUsage::DirectoryOperation,
            AttributeUsage::DistributedOperation,
            AttributeUsage::DsaOperation,
        ]
        .into_iter()
        .find(|usage| usage.keyword().eq_ignore_ascii_case(keyword))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub header: ElementHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingRule {
    pub header: ElementHeader,
    pub syntax: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeType {
    pub header: ElementHeader,
    pub superior: Option<String>,
    pub equality: Option<String>,
    pub ordering: Option<String>,
    pub substring: Option<String>,
    pub syntax: Option<String>,
    /// Upper bound written as `{n}` after the syntax OID.
    pub syntax_length: Option<u32>,
    pub single_value: bool,
    pub collective: bool,
    pub no_user_modification: bool,
    pub usage: AttributeUsage,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectClass {
    pub header: ElementHeader,
    pub superiors: Vec<String>,
    pub kind: ObjectClassKind,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NameForm {
    pub header: ElementHeader,
    pub structural_class: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

/// DIT content rule. Its OID is the OID of the structural class it governs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DitContentRule {
    pub header: ElementHeader,
    pub auxiliary_classes: Vec<String>,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub prohibited: Vec<String>,
}

/// DIT structure rule. Its header OID holds the integer rule ID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DitStructureRule {
    pub header: ElementHeader,
    pub name_form: String,
    pub superior_rules: Vec<String>,
}

/// Matching rule use. Its OID is the OID of the matching rule it restricts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchingRuleUse {
    pub header: ElementHeader,
    pub attributes: Vec<String>,
}

/// Role a reference plays in the referencing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceRole {
    SuperiorType,
    EqualityRule,
    OrderingRule,
    SubstringRule,
    AttributeSyntax,
    SuperiorClass,
    RequiredInObjectClass,
    OptionalInObjectClass,
    StructuralClassInNameForm,
    RequiredInNameForm,
    OptionalInNameForm,
    StructuralClassInContentRule,
    AuxiliaryClassInContentRule,
    RequiredInContentRule,
    OptionalInContentRule,
    ProhibitedInContentRule,
    NameFormInStructureRule,
    SuperiorRule,
    MatchingRuleOfUse,
    AttributeInMatchingRuleUse,
}

impl ReferenceRole {
    /// Whether the reference forms part of a superior chain.
    pub fn is_superior(&self) -> bool {
        matches!(
            self,
            ReferenceRole::SuperiorType | ReferenceRole::SuperiorClass | ReferenceRole::SuperiorRule
        )
    }

    /// Describes what the referenced element is to the referencing one.
    pub fn describe(&self) -> &'static str {
        match self {
            ReferenceRole::SuperiorType => "superior type",
            ReferenceRole::EqualityRule => "equality matching rule",
            ReferenceRole::OrderingRule => "ordering matching rule",
            ReferenceRole::SubstringRule => "substring matching rule",
            ReferenceRole::AttributeSyntax => "syntax",
            ReferenceRole::SuperiorClass => "superior class",
            ReferenceRole::RequiredInObjectClass
            | ReferenceRole::RequiredInNameForm
            | ReferenceRole::RequiredInContentRule => "required attribute",
            ReferenceRole::OptionalInObjectClass
            | ReferenceRole::OptionalInNameForm
            | ReferenceRole::OptionalInContentRule => "optional attribute",
            ReferenceRole::ProhibitedInContentRule => "prohibited attribute",
            ReferenceRole::StructuralClassInNameForm
            | ReferenceRole::StructuralClassInContentRule => "structural class",
            ReferenceRole::AuxiliaryClassInContentRule => "auxiliary class",
            ReferenceRole::NameFormInStructureRule => "name form",
            ReferenceRole::SuperiorRule => "superior rule",
            ReferenceRole::MatchingRuleOfUse => "matching rule",
            ReferenceRole::AttributeInMatchingRuleUse => "applicable attribute",
        }
    }
}

/// Unresolved reference from one element to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ElementKind,
    pub target: String,
    pub role: ReferenceRole,
}

impl Reference {
    fn new(kind: ElementKind, target: &str, role: ReferenceRole) -> Self {
        Self {
            kind,
            target: target.to_string(),
            role,
        }
    }
}

/// A schema element of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaElement {
    Syntax(Syntax),
    MatchingRule(MatchingRule),
    AttributeType(AttributeType),
    ObjectClass(ObjectClass),
    NameForm(NameForm),
    DitContentRule(DitContentRule),
    DitStructureRule(DitStructureRule),
    MatchingRuleUse(MatchingRuleUse),
}

impl SchemaElement {
    pub fn kind(&self) -> ElementKind {
        match self {
            SchemaElement::Syntax(_) => ElementKind::Syntax,
            SchemaElement::MatchingRule(_) => ElementKind::MatchingRule,
            SchemaElement::AttributeType(_) => ElementKind::AttributeType,
            SchemaElement::ObjectClass(_) => ElementKind::ObjectClass,
            SchemaElement::NameForm(_) => ElementKind::NameForm,
            SchemaElement::DitContentRule(_) => ElementKind::DitContentRule,
            SchemaElement::DitStructureRule(_) => ElementKind::DitStructureRule,
            SchemaElement::MatchingRuleUse(_) => ElementKind::MatchingRuleUse,
        }
    }

    pub fn header(&self) -> &ElementHeader {
        match self {
            SchemaElement::Syntax(e) => &e.header,
            SchemaElement::MatchingRule(e) => &e.header,
            SchemaElement::AttributeType(e) => &e.header,
            SchemaElement::ObjectClass(e) => &e.header,
            SchemaElement::NameForm(e) => &e.header,
            SchemaElement::DitContentRule(e) => &e.header,
            SchemaElement::DitStructureRule(e) => &e.header,
            SchemaElement::MatchingRuleUse(e) => &e.header,
        }
    }

    pub fn oid(&self) -> &str {
        &self.header().oid
    }

    pub fn names(&self) -> &[String] {
        &self.header().names
    }

    pub fn name_or_oid(&self) -> &str {
        self.header().name_or_oid()
    }

    pub fn is_obsolete(&self) -> bool {
        self.header().obsolete
    }

    pub fn as_object_class(&self) -> Option<&ObjectClass> {
        match self {
            SchemaElement::ObjectClass(oc) => Some(oc),
            _ => None,
        }
    }

    /// All references this element makes, in definition order.
    pub fn references(&self) -> Vec<Reference> {
        use ElementKind as K;
        use ReferenceRole as R;

        let mut refs = Vec::new();
        let push_all = |refs: &mut Vec<Reference>, kind, targets: &[String], role| {
            refs.extend(targets.iter().map(|t| Reference::new(kind, t, role)));
        };

        match self {
            SchemaElement::Syntax(_) | SchemaElement::MatchingRule(_) => {}
            SchemaElement::AttributeType(at) => {
                if let Some(sup) = &at.superior {
                    refs.push(Reference::new(K::AttributeType, sup, R::SuperiorType));
                }
                for (rule, role) in [
                    (&at.equality, R::EqualityRule),
                    (&at.ordering, R::OrderingRule),
                    (&at.substring, R::SubstringRule),
                ] {
                    if let Some(rule) = rule {
                        refs.push(Reference::new(K::MatchingRule, rule, role));
                    }
                }
                if let Some(syntax) = &at.syntax {
                    refs.push(Reference::new(K::Syntax, syntax, R::AttributeSyntax));
                }
            }
            SchemaElement::ObjectClass(oc) => {
                push_all(&mut refs, K::ObjectClass, &oc.superiors, R::SuperiorClass);
                push_all(&mut refs, K::AttributeType, &oc.required, R::RequiredInObjectClass);
                push_all(&mut refs, K::AttributeType, &oc.optional, R::OptionalInObjectClass);
            }
            SchemaElement::NameForm(nf) => {
                refs.push(Reference::new(
                    K::ObjectClass,
                    &nf.structural_class,
                    R::StructuralClassInNameForm,
                ));
                push_all(&mut refs, K::AttributeType, &nf.required, R::RequiredInNameForm);
                push_all(&mut refs, K::AttributeType, &nf.optional, R::OptionalInNameForm);
            }
            SchemaElement::DitContentRule(dcr) => {
                refs.push(Reference::new(
                    K::ObjectClass,
                    &dcr.header.oid,
                    R::StructuralClassInContentRule,
                ));
                push_all(
                    &mut refs,
                    K::ObjectClass,
                    &dcr.auxiliary_classes,
                    R::AuxiliaryClassInContentRule,
                );
                push_all(&mut refs, K::AttributeType, &dcr.required, R::RequiredInContentRule);
                push_all(&mut refs, K::AttributeType, &dcr.optional, R::OptionalInContentRule);
                push_all(
                    &mut refs,
                    K::AttributeType,
                    &dcr.prohibited,
                    R::ProhibitedInContentRule,
                );
            }
            SchemaElement::DitStructureRule(dsr) => {
                refs.push(Reference::new(
                    K::NameForm,
                    &dsr.name_form,
                    R::NameFormInStructureRule,
                ));
                push_all(&mut refs, K::DitStructureRule, &dsr.superior_rules, R::SuperiorRule);
            }
            SchemaElement::MatchingRuleUse(mru) => {
                refs.push(Reference::new(
                    K::MatchingRule,
                    &mru.header.oid,
                    R::MatchingRuleOfUse,
                ));
                push_all(
                    &mut refs,
                    K::AttributeType,
                    &mru.attributes,
                    R::AttributeInMatchingRuleUse,
                );
            }
        }

        refs
    }
}

impl fmt::Display for SchemaElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::encoder::encode(self))
    }
}
