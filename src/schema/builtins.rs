//! Built-in syntaxes and matching rules
//!
//! These are always present and never written to schema files. Schema files
//! may define additional syntaxes and matching rules; a file definition whose
//! OID matches a built-in is ignored at load time.

use super::element::{ElementHeader, MatchingRule, SchemaElement, Syntax};

pub const DIRECTORY_STRING_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.15";
pub const IA5_STRING_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.26";
pub const INTEGER_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.27";
pub const BOOLEAN_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.7";
pub const DN_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.12";
pub const OID_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.38";
pub const OCTET_STRING_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.40";
pub const GENERALIZED_TIME_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.24";
pub const TELEPHONE_NUMBER_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.50";

const SYNTAXES: &[(&str, &str)] = &[
    (DIRECTORY_STRING_SYNTAX, "Directory String"),
    (IA5_STRING_SYNTAX, "IA5 String"),
    (INTEGER_SYNTAX, "INTEGER"),
    (BOOLEAN_SYNTAX, "Boolean"),
    (DN_SYNTAX, "DN"),
    (OID_SYNTAX, "OID"),
    (OCTET_STRING_SYNTAX, "Octet String"),
    (GENERALIZED_TIME_SYNTAX, "Generalized Time"),
    (TELEPHONE_NUMBER_SYNTAX, "Telephone Number"),
];

const MATCHING_RULES: &[(&str, &str, &str)] = &[
    ("2.5.13.0", "objectIdentifierMatch", OID_SYNTAX),
    ("2.5.13.1", "distinguishedNameMatch", DN_SYNTAX),
    ("2.5.13.2", "caseIgnoreMatch", DIRECTORY_STRING_SYNTAX),
    ("2.5.13.3", "caseIgnoreOrderingMatch", DIRECTORY_STRING_SYNTAX),
    ("2.5.13.4", "caseIgnoreSubstringsMatch", DIRECTORY_STRING_SYNTAX),
    ("2.5.13.5", "caseExactMatch", DIRECTORY_STRING_SYNTAX),
    ("2.5.13.13", "booleanMatch", BOOLEAN_SYNTAX),
    ("2.5.13.14", "integerMatch", INTEGER_SYNTAX),
    ("2.5.13.15", "integerOrderingMatch", INTEGER_SYNTAX),
    ("2.5.13.17", "octetStringMatch", OCTET_STRING_SYNTAX),
    ("2.5.13.20", "telephoneNumberMatch", TELEPHONE_NUMBER_SYNTAX),
    ("2.5.13.27", "generalizedTimeMatch", GENERALIZED_TIME_SYNTAX),
    ("1.3.6.1.4.1.1466.109.114.1", "caseExactIA5Match", IA5_STRING_SYNTAX),
    ("1.3.6.1.4.1.1466.109.114.2", "caseIgnoreIA5Match", IA5_STRING_SYNTAX),
];

/// All built-in elements, syntaxes first.
pub fn builtin_elements() -> Vec<SchemaElement> {
    let syntaxes = SYNTAXES.iter().map(|(oid, desc)| {
        let mut header = ElementHeader::new(*oid);
        header.description = Some(desc.to_string());
        SchemaElement::Syntax(Syntax { header })
    });

    let rules = MATCHING_RULES.iter().map(|(oid, name, syntax)| {
        let mut header = ElementHeader::new(*oid);
        header.names.push(name.to_string());
        SchemaElement::MatchingRule(MatchingRule {
            header,
            syntax: syntax.to_string(),
        })
    });

    syntaxes.chain(rules).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::element::ElementKind;

    #[test]
    fn test_every_rule_syntax_is_builtin() {
        let elements = builtin_elements();
        let syntax_oids: Vec<&str> = elements
            .iter()
            .filter(|e| e.kind() == ElementKind::Syntax)
            .map(|e| e.oid())
            .collect();

        for element in &elements {
            if let SchemaElement::MatchingRule(mr) = element {
                assert!(syntax_oids.contains(&mr.syntax.as_str()), "{}", mr.syntax);
            }
        }
    }

    #[test]
    fn test_builtin_oids_are_unique() {
        let elements = builtin_elements();
        let mut oids: Vec<&str> = elements.iter().map(|e| e.oid()).collect();
        oids.sort_unstable();
        oids.dedup();
        assert_eq!(oids.len(), elements.len());
    }
}
