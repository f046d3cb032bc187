//! Exclusive XML Canonicalization 1.0 without comments, for a standalone
//! element.
//!
//! Namespace declarations are rendered only where a prefix is visibly used
//! and not already rendered on an output ancestor. They come before the
//! attributes, sorted by prefix, and attributes are sorted by namespace URI
//! and local name. Empty elements become start and end tag pairs.

use std::borrow::Cow;
use std::collections::BTreeMap;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Error, Result};
use crate::names::NS_XML;

type Scope = Vec<(String, String)>;

pub(crate) fn canonicalize(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::with_capacity(xml.len());
    // declarations in the input, innermost element last
    let mut declared: Vec<Scope> = Vec::new();
    // declarations rendered on output ancestors
    let mut rendered: Vec<Scope> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::MalformedDocument(format!(
                "XML parse error at position {}: {}",
                reader.error_position(),
                e
            ))
        })?;
        match event {
            Event::Start(e) => {
                start_tag(&e, &mut declared, &mut rendered, &mut out)?;
            }
            Event::Empty(e) => {
                let name = start_tag(&e, &mut declared, &mut rendered, &mut out)?;
                end_tag(&name, &mut declared, &mut rendered, &mut out);
            }
            Event::End(e) => {
                let name = utf8(e.name().as_ref())?.to_string();
                end_tag(&name, &mut declared, &mut rendered, &mut out);
            }
            Event::Text(t) if !declared.is_empty() => {
                let raw = utf8(&t)?.replace("\r\n", "\n");
                push_text(&unescaped(&raw)?, &mut out);
            }
            Event::CData(c) if !declared.is_empty() => {
                push_text(&String::from_utf8_lossy(&c), &mut out);
            }
            Event::PI(pi) if !declared.is_empty() => {
                out.push_str("<?");
                out.push_str(utf8(&pi)?);
                out.push_str("?>");
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !declared.is_empty() {
        return Err(Error::MalformedDocument(
            "element is never closed".to_string(),
        ));
    }
    Ok(out)
}

/// Render a start tag and return the element's qualified name.
fn start_tag(
    e: &BytesStart<'_>,
    declared: &mut Vec<Scope>,
    rendered: &mut Vec<Scope>,
    out: &mut String,
) -> Result<String> {
    let name = utf8(e.name().as_ref())?.to_string();

    let mut scope = Scope::new();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| Error::MalformedDocument(format!("invalid attribute: {}", e)))?;
        let key = utf8(attr.key.as_ref())?;
        let value = attribute_value(&attr.value)?;
        if key == "xmlns" {
            scope.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.push((prefix.to_string(), value));
        } else {
            attributes.push((key.to_string(), value));
        }
    }
    declared.push(scope);

    let mut utilized: BTreeMap<String, String> = BTreeMap::new();
    let element_prefix = prefix_of(&name).unwrap_or("");
    let attribute_prefixes = attributes.iter().filter_map(|(key, _)| prefix_of(key));
    for prefix in std::iter::once(element_prefix).chain(attribute_prefixes) {
        if prefix == "xml" {
            continue;
        }
        let uri = lookup(declared, prefix).unwrap_or("");
        if !prefix.is_empty() && uri.is_empty() {
            return Err(Error::MalformedDocument(format!(
                "undeclared namespace prefix '{}'",
                prefix
            )));
        }
        utilized.insert(prefix.to_string(), uri.to_string());
    }

    let mut sorted: Vec<(String, String, String, String)> = attributes
        .into_iter()
        .map(|(key, value)| {
            let (uri, local) = match key.split_once(':') {
                Some(("xml", local)) => (NS_XML.to_string(), local.to_string()),
                Some((prefix, local)) => (
                    lookup(declared, prefix).unwrap_or("").to_string(),
                    local.to_string(),
                ),
                None => (String::new(), key.clone()),
            };
            (uri, local, key, value)
        })
        .collect();
    sorted.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    out.push('<');
    out.push_str(&name);
    let mut render_scope = Scope::new();
    for (prefix, uri) in utilized {
        if lookup(rendered, &prefix).unwrap_or("") == uri {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(&prefix);
            out.push_str("=\"");
        }
        push_attribute_value(&uri, out);
        out.push('"');
        render_scope.push((prefix, uri));
    }
    for (_, _, key, value) in &sorted {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        push_attribute_value(value, out);
        out.push('"');
    }
    out.push('>');
    rendered.push(render_scope);

    Ok(name)
}

fn end_tag(name: &str, declared: &mut Vec<Scope>, rendered: &mut Vec<Scope>, out: &mut String) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
    declared.pop();
    rendered.pop();
}

fn lookup<'a>(scopes: &'a [Scope], prefix: &str) -> Option<&'a str> {
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter().rev())
        .find(|(p, _)| p == prefix)
        .map(|(_, uri)| uri.as_str())
}

fn prefix_of(qname: &str) -> Option<&str> {
    qname.split_once(':').map(|(prefix, _)| prefix)
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|e| Error::MalformedDocument(format!("invalid UTF-8: {}", e)))
}

fn unescaped(raw: &str) -> Result<Cow<'_, str>> {
    unescape(raw).map_err(|e| Error::MalformedDocument(format!("invalid escape: {}", e)))
}

/// Attribute value after XML attribute-value normalization.
fn attribute_value(raw: &[u8]) -> Result<String> {
    let normalized = utf8(raw)?.replace("\r\n", " ").replace(['\t', '\n', '\r'], " ");
    Ok(unescaped(&normalized)?.into_owned())
}

fn push_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn push_attribute_value(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // expected outputs produced with `xmllint --exc-c14n`

    #[test]
    fn test_namespaces_precede_sorted_attributes() {
        let input = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a" Version="2.0"/>"#;
        assert_eq!(
            canonicalize(input).unwrap(),
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a" Version="2.0"></saml:Assertion>"#
        );
    }

    #[test]
    fn test_assertion_vector() {
        let input = concat!(
            r#"<saml:Assertion Version="2.0" xmlns:xs="http://www.w3.org/2001/XMLSchema" ID="_a1" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" IssueInstant="2024-01-01T00:00:00Z">"#,
            r#"<saml:Issuer>http://localhost:8080/sso</saml:Issuer>"#,
            r#"<saml:Subject><saml:NameID Format="urn:x" SPNameQualifier="a&amp;b &quot;q&quot;">x &lt; y &gt; z</saml:NameID>"#,
            r#"<saml:SubjectConfirmationData Recipient="https://sp/acs" NotOnOrAfter="2024-01-01T00:05:00Z"/></saml:Subject>"#,
            r#"<saml:AttributeStatement><saml:Attribute xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" Name="mail">"#,
            r#"<saml:AttributeValue xsi:type="xs:string">a@b</saml:AttributeValue></saml:Attribute></saml:AttributeStatement>"#,
            r#"<plain xmlns="urn:default" b="2" a="1"><inner/></plain></saml:Assertion>"#,
        );
        let expected = concat!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_a1" IssueInstant="2024-01-01T00:00:00Z" Version="2.0">"#,
            r#"<saml:Issuer>http://localhost:8080/sso</saml:Issuer>"#,
            r#"<saml:Subject><saml:NameID Format="urn:x" SPNameQualifier="a&amp;b &quot;q&quot;">x &lt; y &gt; z</saml:NameID>"#,
            r#"<saml:SubjectConfirmationData NotOnOrAfter="2024-01-01T00:05:00Z" Recipient="https://sp/acs"></saml:SubjectConfirmationData></saml:Subject>"#,
            r#"<saml:AttributeStatement><saml:Attribute Name="mail">"#,
            r#"<saml:AttributeValue xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="xs:string">a@b</saml:AttributeValue></saml:Attribute></saml:AttributeStatement>"#,
            r#"<plain xmlns="urn:default" a="1" b="2"><inner></inner></plain></saml:Assertion>"#,
        );
        assert_eq!(canonicalize(input).unwrap(), expected);
    }

    #[test]
    fn test_signed_info_vector() {
        let input = r##"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:Reference URI="#_a1"><ds:DigestValue>abc=</ds:DigestValue></ds:Reference></ds:SignedInfo>"##;
        let expected = r##"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"></ds:CanonicalizationMethod><ds:Reference URI="#_a1"><ds:DigestValue>abc=</ds:DigestValue></ds:Reference></ds:SignedInfo>"##;
        assert_eq!(canonicalize(input).unwrap(), expected);
    }

    #[test]
    fn test_declaration_and_whitespace_outside_root_dropped() {
        let input = "<?xml version=\"1.0\"?>\n<a xmlns=\"urn:a\">\n  <b/>\n</a>\n";
        assert_eq!(
            canonicalize(input).unwrap(),
            "<a xmlns=\"urn:a\">\n  <b></b>\n</a>"
        );
    }

    #[test]
    fn test_undeclared_prefix_is_malformed() {
        assert!(matches!(
            canonicalize("<x:a/>"),
            Err(Error::MalformedDocument(_))
        ));
    }
}
