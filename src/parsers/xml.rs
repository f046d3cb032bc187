//! Namespace-resolved XML element tree.
//!
//! Every SAML message and metadata document is parsed once into a [`Document`]
//! and then lifted into a typed structure by the sibling parsers. Parsing only
//! fails on documents that are not well-formed; semantic problems are left to
//! the checks.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::error::{Error, Result};
use crate::names::NS_XML;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An attribute with its resolved namespace. Namespace declarations are not
/// kept as attributes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

pub fn parse_bytes(input: &[u8]) -> Result<Document> {
    let xml = std::str::from_utf8(input)
        .map_err(|e| Error::MalformedDocument(format!("document is not valid UTF-8: {}", e)))?;
    parse(xml)
}

pub fn parse(xml: &str) -> Result<Document> {
    let mut reader = NsReader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (resolved, event) = match reader.read_resolved_event() {
            Ok(pair) => pair,
            Err(e) => {
                return Err(Error::MalformedDocument(format!(
                    "XML parse error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
        };
        let namespace = element_namespace(resolved)?;

        match event {
            Event::Start(e) => {
                let element = start_element(&reader, &e, namespace)?;
                if root.is_some() && stack.is_empty() {
                    return Err(Error::MalformedDocument(
                        "document has more than one root element".to_string(),
                    ));
                }
                stack.push(element);
            }
            Event::Empty(e) => {
                let element = start_element(&reader, &e, namespace)?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    Error::MalformedDocument("unexpected closing tag".to_string())
                })?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::MalformedDocument(format!("invalid text content: {}", e)))?;
                push_text(&text, &mut stack)?;
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).to_string();
                push_text(&text, &mut stack)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::MalformedDocument(format!(
            "element <{}> is never closed",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    root.map(|root| Document { root })
        .ok_or_else(|| Error::MalformedDocument("document has no root element".to_string()))
}

fn element_namespace(resolved: ResolveResult<'_>) -> Result<Option<String>> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.as_ref()).to_string())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) if prefix == b"xml" => Ok(Some(NS_XML.to_string())),
        ResolveResult::Unknown(prefix) => Err(Error::MalformedDocument(format!(
            "undeclared namespace prefix '{}'",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

fn start_element(
    reader: &NsReader<&[u8]>,
    e: &BytesStart<'_>,
    namespace: Option<String>,
) -> Result<Element> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| Error::MalformedDocument(format!("invalid attribute: {}", e)))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = element_namespace(resolved)?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::MalformedDocument(format!("invalid attribute value: {}", e)))?;
        attributes.push(Attribute {
            namespace,
            name: String::from_utf8_lossy(local.as_ref()).to_string(),
            value: value.to_string(),
        });
    }

    Ok(Element {
        namespace,
        name: String::from_utf8_lossy(e.local_name().as_ref()).to_string(),
        attributes,
        children: Vec::new(),
    })
}

fn close_element(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(Error::MalformedDocument(
                "document has more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn push_text(text: &str, stack: &mut [Element]) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Text(text.to_string()));
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::MalformedDocument(
            "text content outside of the root element".to_string(),
        )),
    }
}

impl Document {
    /// All elements in document order, root included.
    pub fn elements(&self) -> Descendants<'_> {
        self.root.descendants()
    }

    /// All elements with the given namespace and local name, in document order.
    pub fn find_all<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.is(namespace, name))
    }

    /// Comparison form: whitespace-only text dropped, adjacent text merged and
    /// attributes sorted.
    pub fn normalized(&self) -> Document {
        Document {
            root: self.root.normalized(),
        }
    }

    /// Node equality after normalizing both documents.
    pub fn is_equivalent(&self, other: &Document) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Element {
    pub fn is(&self, namespace: &str, name: &str) -> bool {
        self.name == name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of an attribute that carries no namespace.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attr_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// This element and everything below it, depth-first in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Concatenated text of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    fn normalized(&self) -> Element {
        let mut attributes = self.attributes.clone();
        attributes.sort();

        let mut children: Vec<Node> = Vec::new();
        for child in &self.children {
            match child {
                Node::Element(e) => children.push(Node::Element(e.normalized())),
                Node::Text(t) => {
                    if let Some(Node::Text(prev)) = children.last_mut() {
                        prev.push_str(t);
                    } else {
                        children.push(Node::Text(t.clone()));
                    }
                }
            }
        }
        children.retain(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()));

        Element {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            attributes,
            children,
        }
    }
}

fn collect_text(element: &Element, out: &mut String) {
    for child in &element.children {
        match child {
            Node::Text(t) => out.push_str(t),
            Node::Element(e) => collect_text(e, out),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.child_elements().collect::<Vec<_>>().into_iter().rev());
        Some(next)
    }
}
