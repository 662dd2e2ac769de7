//! Owned DOM over quick-xml events.
//!
//! The tree preserves attribute order and text verbatim so that a parse /
//! serialize round trip is stable, which the digest checks rely on.
//! Namespaces are resolved at parse time; each element records the URI its
//! prefix resolved to.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use sp_core::{ErrorKind, SpError, SpResult};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
const MAX_DEPTH: usize = 64;

/// An XML attribute as written, including namespace declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified attribute name.
    pub name: String,
    /// Unescaped attribute value.
    pub value: String,
}

/// A node in the tree.
#[derive(Debug, Clone)]
pub enum XmlNode {
    /// A child element.
    Element(Element),
    /// Unescaped character data.
    Text(String),
    /// A comment (kept for canonicalization with comments).
    Comment(String),
}

/// An element with its resolved namespace.
#[derive(Debug, Clone)]
pub struct Element {
    /// Namespace prefix as written.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Namespace URI the prefix (or default namespace) resolved to.
    pub ns: Option<String>,
    /// Attributes in document order.
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order.
    pub children: Vec<XmlNode>,
}

impl Element {
    /// The qualified name as written.
    #[must_use]
    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }

    /// Returns true when this element has the given namespace and local
    /// name.
    #[must_use]
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns.as_deref() == Some(ns)
    }

    /// Looks up an attribute by its qualified name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Iterates over child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Finds the first child element with the given namespace and local
    /// name.
    #[must_use]
    pub fn find_child(&self, ns: &str, local: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.is(ns, local))
    }

    /// Finds all child elements with the given namespace and local name.
    #[must_use]
    pub fn find_children(&self, ns: &str, local: &str) -> Vec<&Element> {
        self.child_elements().filter(|e| e.is(ns, local)).collect()
    }

    /// Concatenated direct text content, trimmed.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }

    /// All elements of the subtree in document order, self first.
    #[must_use]
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(el) = stack.pop() {
            out.push(el);
            // Reverse so that document order is preserved by the stack.
            for child in el.child_elements().collect::<Vec<_>>().into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Finds all descendant elements (including self) with the given
    /// namespace and local name.
    #[must_use]
    pub fn find_descendants(&self, ns: &str, local: &str) -> Vec<&Element> {
        self.descendants()
            .into_iter()
            .filter(|e| e.is(ns, local))
            .collect()
    }

    /// Removes direct child elements with the given namespace and local
    /// name, returning how many were removed.
    pub fn remove_children(&mut self, ns: &str, local: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|n| match n {
            XmlNode::Element(e) => !e.is(ns, local),
            _ => true,
        });
        before - self.children.len()
    }

    /// Serializes the subtree.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qname());
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            out.push_str(&escape_attr(&attr.value));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for node in &self.children {
            match node {
                XmlNode::Element(e) => e.write_xml(out),
                XmlNode::Text(t) => out.push_str(&escape_text(t)),
                XmlNode::Comment(c) => {
                    out.push_str("<!--");
                    out.push_str(c);
                    out.push_str("-->");
                }
            }
        }
        out.push_str("</");
        out.push_str(&self.qname());
        out.push('>');
    }
}

/// Escapes character data.
#[must_use]
pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escapes an attribute value (double-quote delimited).
#[must_use]
pub fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A parsed document.
#[derive(Debug, Clone)]
pub struct Document {
    /// The document element.
    pub root: Element,
    /// Prefix-to-URI bindings observed anywhere in the document; used when
    /// canonicalizing subtrees whose declarations live on an ancestor.
    prefixes: HashMap<String, String>,
}

impl Document {
    /// Parses a document.
    ///
    /// Rejects DTDs, undeclared entity references, undeclared namespace
    /// prefixes, and trailing content after the document element.
    pub fn parse(xml: &str) -> SpResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut prefixes: HashMap<String, String> = HashMap::new();
        prefixes.insert("xml".to_string(), XML_NS.to_string());

        let mut ns_stack: Vec<HashMap<String, String>> = vec![{
            let mut base = HashMap::new();
            base.insert("xml".to_string(), XML_NS.to_string());
            base
        }];
        let mut elem_stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let scope_underflow = || invalid_xml("namespace scope underflow");
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if root.is_some() && elem_stack.is_empty() {
                        return Err(invalid_xml("content after the document element"));
                    }
                    if elem_stack.len() >= MAX_DEPTH {
                        return Err(invalid_xml("document nesting too deep"));
                    }
                    let parent_scope = ns_stack.last().ok_or_else(scope_underflow)?;
                    let (element, scope) = open_element(&e, parent_scope, &mut prefixes)?;
                    ns_stack.push(scope);
                    elem_stack.push(element);
                }
                Ok(Event::Empty(e)) => {
                    if root.is_some() && elem_stack.is_empty() {
                        return Err(invalid_xml("content after the document element"));
                    }
                    let parent_scope = ns_stack.last().ok_or_else(scope_underflow)?;
                    let (element, _) = open_element(&e, parent_scope, &mut prefixes)?;
                    attach(&mut elem_stack, &mut root, element)?;
                }
                Ok(Event::End(_)) => {
                    let element = elem_stack
                        .pop()
                        .ok_or_else(|| invalid_xml("unbalanced end tag"))?;
                    ns_stack.pop();
                    attach(&mut elem_stack, &mut root, element)?;
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| invalid_xml(format!("entity reference: {err}")))?;
                    match elem_stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Text(text.into_owned())),
                        None => {
                            if !text.trim().is_empty() {
                                return Err(invalid_xml("text outside the document element"));
                            }
                        }
                    }
                }
                Ok(Event::CData(e)) => {
                    let bytes = e.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|err| invalid_xml(format!("CDATA is not UTF-8: {err}")))?;
                    if let Some(parent) = elem_stack.last_mut() {
                        parent.children.push(XmlNode::Text(text.to_string()));
                    }
                }
                Ok(Event::Comment(e)) => {
                    if let Some(parent) = elem_stack.last_mut() {
                        let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                        parent.children.push(XmlNode::Comment(text));
                    }
                }
                Ok(Event::DocType(_)) => {
                    return Err(invalid_xml("DTDs are not allowed in SAML messages"));
                }
                Ok(Event::Decl(_) | Event::PI(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => return Err(invalid_xml(e.to_string())),
            }
        }

        if !elem_stack.is_empty() {
            return Err(invalid_xml("unclosed element"));
        }
        let root = root.ok_or_else(|| invalid_xml("no document element"))?;

        Ok(Self { root, prefixes })
    }

    /// Resolves a prefix against the bindings seen in this document.
    #[must_use]
    pub fn prefix_uri(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(String::as_str)
    }

    /// All prefix-to-URI bindings seen in this document (first binding
    /// wins). Canonicalizing a detached subtree starts from these.
    #[must_use]
    pub fn prefix_bindings(&self) -> &HashMap<String, String> {
        &self.prefixes
    }

    /// Counts how many elements carry each `ID` attribute value.
    #[must_use]
    pub fn id_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for el in self.root.descendants() {
            if let Some(id) = el.attr("ID") {
                *counts.entry(id.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Finds the element carrying the given `ID` attribute value.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.root
            .descendants()
            .into_iter()
            .find(|el| el.attr("ID") == Some(id))
    }

    /// Serializes the document (no XML declaration).
    #[must_use]
    pub fn to_xml(&self) -> String {
        self.root.to_xml()
    }
}

fn invalid_xml(detail: impl Into<String>) -> SpError {
    SpError::new(ErrorKind::InvalidXml, detail)
}

fn attach(
    stack: &mut Vec<Element>,
    root: &mut Option<Element>,
    element: Element,
) -> SpResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err(invalid_xml("multiple document elements"));
            }
            *root = Some(element);
            Ok(())
        }
    }
}

fn open_element(
    start: &quick_xml::events::BytesStart<'_>,
    parent_scope: &HashMap<String, String>,
    prefixes: &mut HashMap<String, String>,
) -> SpResult<(Element, HashMap<String, String>)> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| invalid_xml(format!("element name is not UTF-8: {e}")))?
        .to_string();
    let (prefix, local) = split_qname(&name);

    let mut scope = parent_scope.clone();
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| invalid_xml(format!("bad attribute: {e}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| invalid_xml(format!("attribute name is not UTF-8: {e}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| invalid_xml(format!("attribute value: {e}")))?
            .into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value.clone());
            prefixes.entry(String::new()).or_insert_with(|| value.clone());
        } else if let Some(declared) = key.strip_prefix("xmlns:") {
            scope.insert(declared.to_string(), value.clone());
            prefixes
                .entry(declared.to_string())
                .or_insert_with(|| value.clone());
        }

        attributes.push(Attribute { name: key, value });
    }

    let ns = match &prefix {
        Some(p) => Some(
            scope
                .get(p.as_str())
                .ok_or_else(|| {
                    SpError::new(
                        ErrorKind::InvalidXmlNamespace,
                        format!("undeclared namespace prefix {p:?}"),
                    )
                })?
                .clone(),
        ),
        None => scope.get("").filter(|uri| !uri.is_empty()).cloned(),
    };

    Ok((
        Element {
            prefix,
            local: local.to_string(),
            ns,
            attributes,
            children: Vec::new(),
        },
        scope,
    ))
}

fn split_qname(name: &str) -> (Option<String>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
        r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r1" Version="2.0">"#,
        r#"<saml:Issuer>https://idp.example/meta</saml:Issuer>"#,
        r#"<saml:Assertion ID="_a1"><saml:AttributeStatement/></saml:Assertion>"#,
        r#"</samlp:Response>"#
    );

    #[test]
    fn parses_namespaced_document() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert!(doc
            .root
            .is("urn:oasis:names:tc:SAML:2.0:protocol", "Response"));
        assert_eq!(doc.root.attr("ID"), Some("_r1"));

        let issuer = doc
            .root
            .find_child("urn:oasis:names:tc:SAML:2.0:assertion", "Issuer")
            .unwrap();
        assert_eq!(issuer.text(), "https://idp.example/meta");
    }

    #[test]
    fn serialization_round_trips() {
        let doc = Document::parse(SAMPLE).unwrap();
        let doc2 = Document::parse(&doc.to_xml()).unwrap();
        assert_eq!(doc.to_xml(), doc2.to_xml());
    }

    #[test]
    fn rejects_doctype() {
        let xml = "<!DOCTYPE foo [<!ENTITY bar \"baz\">]><foo>&bar;</foo>";
        let err = Document::parse(xml).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidXml);
        assert!(err.detail.contains("DTD"));
    }

    #[test]
    fn rejects_undeclared_entity() {
        let err = Document::parse("<foo>&evil;</foo>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidXml);
    }

    #[test]
    fn rejects_undeclared_prefix() {
        let err = Document::parse("<x:foo/>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidXmlNamespace);
    }

    #[test]
    fn rejects_trailing_root() {
        assert!(Document::parse("<a/><b/>").is_err());
    }

    #[test]
    fn id_counts_detect_duplicates() {
        let xml = r#"<r ID="_x"><a ID="_x"/><b ID="_y"/></r>"#;
        let doc = Document::parse(xml).unwrap();
        let counts = doc.id_counts();
        assert_eq!(counts.get("_x"), Some(&2));
        assert_eq!(counts.get("_y"), Some(&1));
    }

    #[test]
    fn find_by_id() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert!(doc.find_by_id("_a1").unwrap().is(
            "urn:oasis:names:tc:SAML:2.0:assertion",
            "Assertion"
        ));
        assert!(doc.find_by_id("_nope").is_none());
    }

    #[test]
    fn remove_children_strips_matching_elements() {
        let mut doc = Document::parse(SAMPLE).unwrap();
        let removed = doc
            .root
            .remove_children("urn:oasis:names:tc:SAML:2.0:assertion", "Assertion");
        assert_eq!(removed, 1);
        assert!(doc
            .root
            .find_child("urn:oasis:names:tc:SAML:2.0:assertion", "Assertion")
            .is_none());
    }

    #[test]
    fn text_is_unescaped_then_reescaped() {
        let doc = Document::parse("<a>x &amp; y</a>").unwrap();
        assert_eq!(doc.root.text(), "x & y");
        assert_eq!(doc.to_xml(), "<a>x &amp; y</a>");
    }

    #[test]
    fn descendants_in_document_order() {
        let doc = Document::parse("<a><b><c/></b><d/></a>").unwrap();
        let names: Vec<&str> = doc
            .root
            .descendants()
            .iter()
            .map(|e| e.local.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }
}
