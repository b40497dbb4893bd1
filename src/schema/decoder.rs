//! Definition decoder
//!
//! Parses RFC 4512 style definitions such as
//!
//! ```text
//! ( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )
//! ```
//!
//! into typed [`SchemaElement`]s. The validator only depends on the
//! [`DefinitionDecoder`] trait; [`Rfc4512Decoder`] is the implementation the
//! server uses.

use super::element::{
    AttributeType, AttributeUsage, DitContentRule, DitStructureRule, ElementHeader, ElementKind,
    Extension, MatchingRule, MatchingRuleUse, NameForm, ObjectClass, ObjectClassKind,
    SchemaElement, Syntax,
};
use super::errors::{SchemaError, SchemaResult};

/// Decodes definition text into typed elements.
pub trait DefinitionDecoder: Send + Sync {
    fn decode(&self, kind: ElementKind, definition: &str) -> SchemaResult<SchemaElement>;

    /// Extracts the OID (or rule ID) of a definition without building the element.
    fn extract_oid(&self, kind: ElementKind, definition: &str) -> SchemaResult<String> {
        self.decode(kind, definition).map(|e| e.oid().to_string())
    }
}

/// Decoder for the RFC 4512 definition grammar.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc4512Decoder;

impl Rfc4512Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl DefinitionDecoder for Rfc4512Decoder {
    fn decode(&self, kind: ElementKind, definition: &str) -> SchemaResult<SchemaElement> {
        let tokens = tokenize(definition).map_err(|reason| SchemaError::Decode { kind, reason })?;
        Parser::new(kind, tokens).parse()
    }

    fn extract_oid(&self, kind: ElementKind, definition: &str) -> SchemaResult<String> {
        let tokens = tokenize(definition).map_err(|reason| SchemaError::Decode { kind, reason })?;
        let mut parser = Parser::new(kind, tokens);
        parser.expect_open()?;
        parser.element_id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Dollar,
    Quoted(String),
    Word(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::Open),
            ')' => tokens.push(Token::Close),
            '$' => tokens.push(Token::Dollar),
            '\'' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '\'' {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(format!("unterminated quoted string at offset {}", pos));
                }
                tokens.push(Token::Quoted(unescape(&value)?));
            }
            _ => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '$' | '\'') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

/// Decodes `\27` and `\5C` escapes inside quoted strings.
fn unescape(value: &str) -> Result<String, String> {
    if !value.contains('\\') {
        return Ok(value.to_string());
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find('\\') {
        out.push_str(&rest[..idx]);
        let escape = rest.get(idx + 1..idx + 3).unwrap_or_default();
        match escape.to_ascii_uppercase().as_str() {
            "27" => out.push('\''),
            "5C" => out.push('\\'),
            _ => return Err(format!("invalid escape sequence '\\{}'", escape)),
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

fn is_numeric_oid(value: &str) -> bool {
    !value.is_empty()
        && value
            .split('.')
            .all(|arc| !arc.is_empty() && arc.bytes().all(|b| b.is_ascii_digit()))
}

fn is_descr(value: &str) -> bool {
    let mut bytes = value.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn is_oid(value: &str) -> bool {
    is_numeric_oid(value) || is_descr(value)
}

struct Parser {
    kind: ElementKind,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(kind: ElementKind, tokens: Vec<Token>) -> Self {
        Self {
            kind,
            tokens,
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::Decode {
            kind: self.kind,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> SchemaResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of definition"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_open(&mut self) -> SchemaResult<()> {
        match self.next()? {
            Token::Open => Ok(()),
            other => Err(self.error(format!("expected '(' but found {:?}", other))),
        }
    }

    fn word(&mut self) -> SchemaResult<String> {
        match self.next()? {
            Token::Word(w) => Ok(w),
            other => Err(self.error(format!("expected an identifier but found {:?}", other))),
        }
    }

    fn oid(&mut self) -> SchemaResult<String> {
        let value = self.word()?;
        if !is_oid(&value) {
            return Err(self.error(format!("'{}' is not a valid OID or name", value)));
        }
        Ok(value)
    }

    /// Numeric OID of the element, or the integer rule ID for structure rules.
    fn element_id(&mut self) -> SchemaResult<String> {
        let value = self.word()?;
        let valid = match self.kind {
            ElementKind::DitStructureRule => value.bytes().all(|b| b.is_ascii_digit()),
            _ => {
                is_numeric_oid(&value)
                    || (is_descr(&value) && value.to_ascii_lowercase().ends_with("-oid"))
            }
        };
        if !valid {
            return Err(self.error(format!("'{}' is not a valid element identifier", value)));
        }
        Ok(value)
    }

    fn quoted(&mut self) -> SchemaResult<String> {
        match self.next()? {
            Token::Quoted(q) => Ok(q),
            other => Err(self.error(format!("expected a quoted string but found {:?}", other))),
        }
    }

    /// `'a'` or `( 'a' 'b' )`
    fn quoted_list(&mut self) -> SchemaResult<Vec<String>> {
        match self.next()? {
            Token::Quoted(q) => Ok(vec![q]),
            Token::Open => {
                let mut values = Vec::new();
                loop {
                    match self.next()? {
                        Token::Close => break,
                        Token::Quoted(q) => values.push(q),
                        other => {
                            return Err(self.error(format!(
                                "expected a quoted string but found {:?}",
                                other
                            )))
                        }
                    }
                }
                if values.is_empty() {
                    return Err(self.error("empty quoted list"));
                }
                Ok(values)
            }
            other => Err(self.error(format!("expected a quoted string but found {:?}", other))),
        }
    }

    /// `oid` or `( oid $ oid ... )`
    fn oid_list(&mut self) -> SchemaResult<Vec<String>> {
        match self.peek() {
            Some(Token::Open) => {
                self.pos += 1;
                let mut values = Vec::new();
                loop {
                    match self.next()? {
                        Token::Close => break,
                        Token::Dollar if !values.is_empty() => {}
                        Token::Word(w) if is_oid(&w) => values.push(w),
                        other => {
                            return Err(self.error(format!("unexpected {:?} in OID list", other)))
                        }
                    }
                }
                if values.is_empty() {
                    return Err(self.error("empty OID list"));
                }
                Ok(values)
            }
            _ => Ok(vec![self.oid()?]),
        }
    }

    /// `id` or `( id id ... )`
    fn rule_id_list(&mut self) -> SchemaResult<Vec<String>> {
        let ids = match self.peek() {
            Some(Token::Open) => {
                self.pos += 1;
                let mut values = Vec::new();
                loop {
                    match self.next()? {
                        Token::Close => break,
                        Token::Word(w) => values.push(w),
                        other => {
                            return Err(self.error(format!("unexpected {:?} in rule ID list", other)))
                        }
                    }
                }
                values
            }
            _ => vec![self.word()?],
        };
        if ids.is_empty() {
            return Err(self.error("empty rule ID list"));
        }
        if let Some(bad) = ids.iter().find(|id| !id.bytes().all(|b| b.is_ascii_digit())) {
            return Err(self.error(format!("'{}' is not a valid rule ID", bad)));
        }
        Ok(ids)
    }

    fn parse(mut self) -> SchemaResult<SchemaElement> {
        self.expect_open()?;
        let header = ElementHeader::new(self.element_id()?);

        let element = match self.kind {
            ElementKind::Syntax => self.parse_syntax(header)?,
            ElementKind::MatchingRule => self.parse_matching_rule(header)?,
            ElementKind::AttributeType => self.parse_attribute_type(header)?,
            ElementKind::ObjectClass => self.parse_object_class(header)?,
            ElementKind::NameForm => self.parse_name_form(header)?,
            ElementKind::DitContentRule => self.parse_content_rule(header)?,
            ElementKind::DitStructureRule => self.parse_structure_rule(header)?,
            ElementKind::MatchingRuleUse => self.parse_matching_rule_use(header)?,
        };

        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected text after closing ')'"));
        }
        Ok(element)
    }

    /// Reads the next keyword, or `None` at the closing parenthesis.
    fn keyword(&mut self) -> SchemaResult<Option<String>> {
        match self.next()? {
            Token::Close => Ok(None),
            Token::Word(w) => Ok(Some(w.to_ascii_uppercase())),
            other => Err(self.error(format!("expected a keyword but found {:?}", other))),
        }
    }

    /// Handles keywords every kind shares. Returns false for unknown keywords.
    fn common(&mut self, keyword: &str, header: &mut ElementHeader) -> SchemaResult<bool> {
        match keyword {
            "NAME" => header.names = self.quoted_list()?,
            "DESC" => header.description = Some(self.quoted()?),
            "OBSOLETE" => header.obsolete = true,
            k if k.starts_with("X-") => {
                let name = match self.tokens.get(self.pos - 1) {
                    Some(Token::Word(original)) => original.clone(),
                    _ => k.to_string(),
                };
                let values = self.quoted_list()?;
                header.extensions.push(Extension { name, values });
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn unknown(&self, keyword: &str) -> SchemaError {
        self.error(format!("unexpected keyword '{}'", keyword))
    }

    fn parse_syntax(&mut self, mut header: ElementHeader) -> SchemaResult<SchemaElement> {
        while let Some(keyword) = self.keyword()? {
            if !self.common(&keyword, &mut header)? {
                return Err(self.unknown(&keyword));
            }
        }
        Ok(SchemaElement::Syntax(Syntax { header }))
    }

    fn parse_matching_rule(&mut self, mut header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut syntax = None;
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "SYNTAX" => syntax = Some(self.oid()?),
                k => {
                    if !self.common(k, &mut header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        let syntax = syntax.ok_or_else(|| self.error("matching rule has no SYNTAX"))?;
        Ok(SchemaElement::MatchingRule(MatchingRule { header, syntax }))
    }

    fn parse_attribute_type(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut at = AttributeType {
            header,
            ..AttributeType::default()
        };
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "SUP" => at.superior = Some(self.oid()?),
                "EQUALITY" => at.equality = Some(self.oid()?),
                "ORDERING" => at.ordering = Some(self.oid()?),
                "SUBSTR" => at.substring = Some(self.oid()?),
                "SYNTAX" => {
                    let (oid, length) = self.syntax_with_length()?;
                    at.syntax = Some(oid);
                    at.syntax_length = length;
                }
                "SINGLE-VALUE" => at.single_value = true,
                "COLLECTIVE" => at.collective = true,
                "NO-USER-MODIFICATION" => at.no_user_modification = true,
                "USAGE" => {
                    let usage = self.word()?;
                    at.usage = AttributeUsage::from_keyword(&usage)
                        .ok_or_else(|| self.error(format!("unknown USAGE '{}'", usage)))?;
                }
                k => {
                    if !self.common(k, &mut at.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        if at.superior.is_none() && at.syntax.is_none() {
            return Err(self.error("attribute type must specify SUP or SYNTAX"));
        }
        if at.collective && at.usage != AttributeUsage::UserApplications {
            return Err(self.error("collective attribute types must have userApplications usage"));
        }
        if at.no_user_modification && at.usage == AttributeUsage::UserApplications {
            return Err(self.error("NO-USER-MODIFICATION requires an operational usage"));
        }
        Ok(SchemaElement::AttributeType(at))
    }

    /// Syntax OID with an optional `{length}` suffix.
    fn syntax_with_length(&mut self) -> SchemaResult<(String, Option<u32>)> {
        let raw = self.word()?;
        let (oid, length) = match raw.find('{') {
            Some(idx) => {
                let bound = raw[idx + 1..]
                    .strip_suffix('}')
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| self.error(format!("invalid syntax length in '{}'", raw)))?;
                (raw[..idx].to_string(), Some(bound))
            }
            None => (raw, None),
        };
        if !is_oid(&oid) {
            return Err(self.error(format!("'{}' is not a valid syntax OID", oid)));
        }
        Ok((oid, length))
    }

    fn parse_object_class(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut oc = ObjectClass {
            header,
            ..ObjectClass::default()
        };
        let mut kind_seen = false;
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "SUP" => oc.superiors = self.oid_list()?,
                "MUST" => oc.required = self.oid_list()?,
                "MAY" => oc.optional = self.oid_list()?,
                "STRUCTURAL" | "AUXILIARY" | "ABSTRACT" => {
                    if kind_seen {
                        return Err(self.error("object class kind specified more than once"));
                    }
                    kind_seen = true;
                    oc.kind = match keyword.as_str() {
                        "AUXILIARY" => ObjectClassKind::Auxiliary,
                        "ABSTRACT" => ObjectClassKind::Abstract,
                        _ => ObjectClassKind::Structural,
                    };
                }
                k => {
                    if !self.common(k, &mut oc.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        Ok(SchemaElement::ObjectClass(oc))
    }

    fn parse_name_form(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut nf = NameForm {
            header,
            ..NameForm::default()
        };
        let mut structural = None;
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "OC" => structural = Some(self.oid()?),
                "MUST" => nf.required = self.oid_list()?,
                "MAY" => nf.optional = self.oid_list()?,
                k => {
                    if !self.common(k, &mut nf.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        nf.structural_class = structural.ok_or_else(|| self.error("name form has no OC"))?;
        if nf.required.is_empty() {
            return Err(self.error("name form has no MUST attributes"));
        }
        Ok(SchemaElement::NameForm(nf))
    }

    fn parse_content_rule(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut dcr = DitContentRule {
            header,
            ..DitContentRule::default()
        };
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "AUX" => dcr.auxiliary_classes = self.oid_list()?,
                "MUST" => dcr.required = self.oid_list()?,
                "MAY" => dcr.optional = self.oid_list()?,
                "NOT" => dcr.prohibited = self.oid_list()?,
                k => {
                    if !self.common(k, &mut dcr.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        Ok(SchemaElement::DitContentRule(dcr))
    }

    fn parse_structure_rule(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut dsr = DitStructureRule {
            header,
            ..DitStructureRule::default()
        };
        let mut form = None;
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "FORM" => form = Some(self.oid()?),
                "SUP" => dsr.superior_rules = self.rule_id_list()?,
                k => {
                    if !self.common(k, &mut dsr.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        dsr.name_form = form.ok_or_else(|| self.error("DIT structure rule has no FORM"))?;
        Ok(SchemaElement::DitStructureRule(dsr))
    }

    fn parse_matching_rule_use(&mut self, header: ElementHeader) -> SchemaResult<SchemaElement> {
        let mut mru = MatchingRuleUse {
            header,
            ..MatchingRuleUse::default()
        };
        while let Some(keyword) = self.keyword()? {
            match keyword.as_str() {
                "APPLIES" => mru.attributes = self.oid_list()?,
                k => {
                    if !self.common(k, &mut mru.header)? {
                        return Err(self.unknown(k));
                    }
                }
            }
        }
        if mru.attributes.is_empty() {
            return Err(self.error("matching rule use has no APPLIES"));
        }
        Ok(SchemaElement::MatchingRuleUse(mru))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(kind: ElementKind, text: &str) -> SchemaResult<SchemaElement> {
        Rfc4512Decoder::new().decode(kind, text)
    }

    #[test]
    fn test_decode_attribute_type() {
        let element = decode(
            ElementKind::AttributeType,
            "( 2.5.4.3 NAME ( 'cn' 'commonName' ) DESC 'RFC4519: common name' SUP name \
             EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15{64} X-ORIGIN 'RFC 4519' )",
        )
        .unwrap();

        let SchemaElement::AttributeType(at) = element else {
            panic!("expected attribute type");
        };
        assert_eq!(at.header.oid, "2.5.4.3");
        assert_eq!(at.header.names, vec!["cn", "commonName"]);
        assert_eq!(at.superior.as_deref(), Some("name"));
        assert_eq!(at.equality.as_deref(), Some("caseIgnoreMatch"));
        assert_eq!(at.syntax.as_deref(), Some("1.3.6.1.4.1.1466.115.121.1.15"));
        assert_eq!(at.syntax_length, Some(64));
        assert_eq!(at.header.extensions[0].name, "X-ORIGIN");
    }

    #[test]
    fn test_decode_object_class_with_dollar_lists() {
        let element = decode(
            ElementKind::ObjectClass,
            "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) MAY ( userPassword $ description ) )",
        )
        .unwrap();

        let oc = element.as_object_class().unwrap();
        assert_eq!(oc.kind, ObjectClassKind::Structural);
        assert_eq!(oc.superiors, vec!["top"]);
        assert_eq!(oc.required, vec!["sn", "cn"]);
        assert_eq!(oc.optional, vec!["userPassword", "description"]);
    }

    #[test]
    fn test_decode_structure_rule_ids() {
        let element = decode(
            ElementKind::DitStructureRule,
            "( 2 NAME 'child' FORM childForm SUP ( 1 7 ) )",
        )
        .unwrap();
        let SchemaElement::DitStructureRule(dsr) = element else {
            panic!("expected structure rule");
        };
        assert_eq!(dsr.header.oid, "2");
        assert_eq!(dsr.superior_rules, vec!["1", "7"]);
    }

    #[test]
    fn test_decode_escaped_description() {
        let element = decode(
            ElementKind::AttributeType,
            r"( 1.2.3 NAME 'x' DESC 'it\27s a \5C test' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
        )
        .unwrap();
        assert_eq!(element.header().description.as_deref(), Some("it's a \\ test"));
    }

    #[test]
    fn test_attribute_type_requires_sup_or_syntax() {
        let err = decode(ElementKind::AttributeType, "( 1.2.3 NAME 'x' )").unwrap_err();
        assert!(matches!(err, SchemaError::Decode { .. }));
    }

    #[test]
    fn test_malformed_definitions_are_rejected() {
        for text in [
            "",
            "1.2.3 NAME 'x' )",
            "( 1.2.3 NAME 'x SUP top )",
            "( 1.2.3 NAME 'x' SUP top",
            "( 1.2.3 NAME 'x' BOGUS top )",
            "( 1.2.3 NAME 'x' ) trailing",
            "( not an oid )",
        ] {
            assert!(
                decode(ElementKind::ObjectClass, text).is_err(),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_extract_oid_without_full_decode() {
        let oid = Rfc4512Decoder::new()
            .extract_oid(ElementKind::ObjectClass, "( 1.2.3.4 NAME 'x' WHATEVER )")
            .unwrap();
        assert_eq!(oid, "1.2.3.4");
    }

    #[test]
    fn test_name_form_requires_oc_and_must() {
        assert!(decode(ElementKind::NameForm, "( 1.2 NAME 'nf' MUST cn )").is_err());
        assert!(decode(ElementKind::NameForm, "( 1.2 NAME 'nf' OC person )").is_err());
        assert!(decode(ElementKind::NameForm, "( 1.2 NAME 'nf' OC person MUST cn )").is_ok());
    }
}
