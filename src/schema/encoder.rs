//! Canonical definition rendering
//!
//! `decode(encode(e)) == e` holds for every element the decoder accepts.

use super::element::{
    AttributeUsage, ElementHeader, Extension, ObjectClassKind, SchemaElement,
};

/// Renders an element as RFC 4512 definition text.
pub fn encode(element: &SchemaElement) -> String {
    let mut out = DefinitionWriter::new(&element.header().oid);

    match element {
        SchemaElement::Syntax(syntax) => {
            out.header_fields(&syntax.header);
        }
        SchemaElement::MatchingRule(mr) => {
            out.header_fields(&mr.header);
            out.keyword_value("SYNTAX", &mr.syntax);
        }
        SchemaElement::AttributeType(at) => {
            out.header_fields(&at.header);
            out.optional("SUP", at.superior.as_deref());
            out.optional("EQUALITY", at.equality.as_deref());
            out.optional("ORDERING", at.ordering.as_deref());
            out.optional("SUBSTR", at.substring.as_deref());
            if let Some(syntax) = &at.syntax {
                match at.syntax_length {
                    Some(len) => out.keyword_value("SYNTAX", &format!("{}{{{}}}", syntax, len)),
                    None => out.keyword_value("SYNTAX", syntax),
                }
            }
            out.flag("SINGLE-VALUE", at.single_value);
            out.flag("COLLECTIVE", at.collective);
            out.flag("NO-USER-MODIFICATION", at.no_user_modification);
            if at.usage != AttributeUsage::UserApplications {
                out.keyword_value("USAGE", at.usage.keyword());
            }
        }
        SchemaElement::ObjectClass(oc) => {
            out.header_fields(&oc.header);
            out.oid_list("SUP", &oc.superiors);
            // STRUCTURAL is the default; only spell out the other two
            if oc.kind != ObjectClassKind::Structural {
                out.flag(oc.kind.keyword(), true);
            }
            out.oid_list("MUST", &oc.required);
            out.oid_list("MAY", &oc.optional);
        }
        SchemaElement::NameForm(nf) => {
            out.header_fields(&nf.header);
            out.keyword_value("OC", &nf.structural_class);
            out.oid_list("MUST", &nf.required);
            out.oid_list("MAY", &nf.optional);
        }
        SchemaElement::DitContentRule(dcr) => {
            out.header_fields(&dcr.header);
            out.oid_list("AUX", &dcr.auxiliary_classes);
            out.oid_list("MUST", &dcr.required);
            out.oid_list("MAY", &dcr.optional);
            out.oid_list("NOT", &dcr.prohibited);
        }
        SchemaElement::DitStructureRule(dsr) => {
            out.header_fields(&dsr.header);
            out.keyword_value("FORM", &dsr.name_form);
            out.rule_ids("SUP", &dsr.superior_rules);
        }
        SchemaElement::MatchingRuleUse(mru) => {
            out.header_fields(&mru.header);
            out.oid_list("APPLIES", &mru.attributes);
        }
    }

    out.finish(&element.header().extensions)
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\5C").replace('\'', "\\27"))
}

struct DefinitionWriter {
    text: String,
}

impl DefinitionWriter {
    fn new(oid: &str) -> Self {
        Self {
            text: format!("( {}", oid),
        }
    }

    fn header_fields(&mut self, header: &ElementHeader) {
        match header.names.as_slice() {
            [] => {}
            [name] => self.keyword_value("NAME", &quote(name)),
            names => {
                let quoted: Vec<String> = names.iter().map(|n| quote(n)).collect();
                self.keyword_value("NAME", &format!("( {} )", quoted.join(" ")));
            }
        }
        if let Some(desc) = &header.description {
            self.keyword_value("DESC", &quote(desc));
        }
        self.flag("OBSOLETE", header.obsolete);
    }

    fn keyword_value(&mut self, keyword: &str, value: &str) {
        self.text.push(' ');
        self.text.push_str(keyword);
        self.text.push(' ');
        self.text.push_str(value);
    }

    fn optional(&mut self, keyword: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.keyword_value(keyword, value);
        }
    }

    fn flag(&mut self, keyword: &str, set: bool) {
        if set {
            self.text.push(' ');
            self.text.push_str(keyword);
        }
    }

    fn oid_list(&mut self, keyword: &str, values: &[String]) {
        match values {
            [] => {}
            [one] => self.keyword_value(keyword, one),
            many => self.keyword_value(keyword, &format!("( {} )", many.join(" $ "))),
        }
    }

    fn rule_ids(&mut self, keyword: &str, values: &[String]) {
        match values {
            [] => {}
            [one] => self.keyword_value(keyword, one),
            many => self.keyword_value(keyword, &format!("( {} )", many.join(" "))),
        }
    }

    fn finish(mut self, extensions: &[Extension]) -> String {
        for ext in extensions {
            match ext.values.as_slice() {
                [one] => self.keyword_value(&ext.name, &quote(one)),
                many => {
                    let quoted: Vec<String> = many.iter().map(|v| quote(v)).collect();
                    self.keyword_value(&ext.name, &format!("( {} )", quoted.join(" ")));
                }
            }
        }
        self.text.push_str(" )");
        self.text
    }
}
