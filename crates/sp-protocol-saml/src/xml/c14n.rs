//! Exclusive XML canonicalization (xml-exc-c14n).
//!
//! Produces the byte stream digests and signatures are computed over.
//! Namespace declarations are rendered on the element that visibly
//! utilizes them, provided no output ancestor has already rendered the
//! same binding; declarations nothing utilizes are dropped. Attributes are
//! sorted and empty elements expanded. Both the signing and the verifying
//! paths go through this function, so a sign/verify round trip is exact.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::dom::{Document, Element, XmlNode};

/// Canonicalizes an element subtree with the exclusive C14N algorithm.
///
/// `doc` supplies the prefix bindings declared on ancestors of `element`,
/// so a subtree can be canonicalized (and detached) without losing the
/// namespaces it inherits.
#[must_use]
pub fn exclusive_c14n(element: &Element, doc: &Document, with_comments: bool) -> String {
    let mut out = String::new();
    let inherited = doc.prefix_bindings().clone();
    write_element(element, &inherited, &BTreeMap::new(), with_comments, &mut out);
    out
}

fn write_element(
    element: &Element,
    inherited: &HashMap<String, String>,
    rendered: &BTreeMap<String, String>,
    with_comments: bool,
    out: &mut String,
) {
    // In-scope context: inherited bindings overridden by this element's own
    // declarations.
    let mut scope = inherited.clone();
    for attr in &element.attributes {
        if attr.name == "xmlns" {
            scope.insert(String::new(), attr.value.clone());
        } else if let Some(prefix) = attr.name.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), attr.value.clone());
        }
    }

    // Prefixes this element visibly utilizes.
    let mut utilized = BTreeSet::new();
    match &element.prefix {
        Some(p) => {
            if p != "xml" {
                utilized.insert(p.clone());
            }
        }
        None => {
            if element.ns.is_some() {
                utilized.insert(String::new());
            }
        }
    }
    for attr in &element.attributes {
        if attr.name == "xmlns" || attr.name.starts_with("xmlns:") {
            continue;
        }
        if let Some((prefix, _)) = attr.name.split_once(':') {
            if prefix != "xml" {
                utilized.insert(prefix.to_string());
            }
        }
    }

    // Declarations to render here: utilized, resolvable, and not already
    // rendered identically by an output ancestor.
    let mut to_render: BTreeMap<String, String> = BTreeMap::new();
    for prefix in utilized {
        let uri = if element.prefix.as_deref() == Some(prefix.as_str())
            || (prefix.is_empty() && element.prefix.is_none())
        {
            element.ns.clone()
        } else {
            scope.get(&prefix).cloned()
        };
        if let Some(uri) = uri {
            if rendered.get(&prefix) != Some(&uri) {
                to_render.insert(prefix, uri);
            }
        }
    }

    let mut rendered_below = rendered.clone();
    for (prefix, uri) in &to_render {
        rendered_below.insert(prefix.clone(), uri.clone());
    }

    out.push('<');
    out.push_str(&element.qname());
    for (prefix, uri) in &to_render {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attr(uri));
        out.push('"');
    }

    let mut plain: Vec<(&str, &str)> = element
        .attributes
        .iter()
        .filter(|a| a.name != "xmlns" && !a.name.starts_with("xmlns:"))
        .map(|a| (a.name.as_str(), a.value.as_str()))
        .collect();
    plain.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in plain {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');

    for node in &element.children {
        match node {
            XmlNode::Element(child) => {
                write_element(child, &scope, &rendered_below, with_comments, out);
            }
            XmlNode::Text(text) => out.push_str(&escape_text(text)),
            XmlNode::Comment(comment) => {
                if with_comments {
                    out.push_str("<!--");
                    out.push_str(comment);
                    out.push_str("-->");
                }
            }
        }
    }

    out.push_str("</");
    out.push_str(&element.qname());
    out.push('>');
}

fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
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
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::dom::Document;

    #[test]
    fn attributes_are_sorted() {
        let doc = Document::parse(r#"<a z="1" b="2" m="3"/>"#).unwrap();
        assert_eq!(
            exclusive_c14n(&doc.root, &doc, false),
            r#"<a b="2" m="3" z="1"></a>"#
        );
    }

    #[test]
    fn empty_elements_are_expanded() {
        let doc = Document::parse("<a><b/></a>").unwrap();
        assert_eq!(exclusive_c14n(&doc.root, &doc, false), "<a><b></b></a>");
    }

    #[test]
    fn comments_are_dropped_without_comments_mode() {
        let doc = Document::parse("<a><!--note--><b/></a>").unwrap();
        assert_eq!(exclusive_c14n(&doc.root, &doc, false), "<a><b></b></a>");
        assert_eq!(
            exclusive_c14n(&doc.root, &doc, true),
            "<a><!--note--><b></b></a>"
        );
    }

    #[test]
    fn namespace_renders_where_visibly_utilized() {
        let xml = r#"<p:root xmlns:p="urn:x" xmlns:q="urn:y"><p:inner a="1">v</p:inner></p:root>"#;
        let doc = Document::parse(xml).unwrap();
        // The unused q binding is dropped; p renders once on the apex.
        assert_eq!(
            exclusive_c14n(&doc.root, &doc, false),
            r#"<p:root xmlns:p="urn:x"><p:inner a="1">v</p:inner></p:root>"#
        );
    }

    #[test]
    fn detached_subtree_reinherits_its_prefix() {
        let xml = r#"<p:root xmlns:p="urn:x"><p:inner a="1">v</p:inner></p:root>"#;
        let doc = Document::parse(xml).unwrap();
        let inner = doc.root.find_child("urn:x", "inner").unwrap();
        assert_eq!(
            exclusive_c14n(inner, &doc, false),
            r#"<p:inner xmlns:p="urn:x" a="1">v</p:inner>"#
        );
    }

    #[test]
    fn sibling_subtrees_each_render_their_prefix() {
        let xml = concat!(
            r#"<r:root xmlns:r="urn:r" xmlns:s="urn:s">"#,
            r#"<s:a/><s:b/>"#,
            r#"</r:root>"#
        );
        let doc = Document::parse(xml).unwrap();
        assert_eq!(
            exclusive_c14n(&doc.root, &doc, false),
            concat!(
                r#"<r:root xmlns:r="urn:r">"#,
                r#"<s:a xmlns:s="urn:s"></s:a><s:b xmlns:s="urn:s"></s:b>"#,
                r#"</r:root>"#
            )
        );
    }

    #[test]
    fn default_namespace_is_carried() {
        let xml = r#"<root xmlns="urn:d"><inner>t</inner></root>"#;
        let doc = Document::parse(xml).unwrap();
        let inner = doc.root.find_child("urn:d", "inner").unwrap();
        assert_eq!(
            exclusive_c14n(inner, &doc, false),
            r#"<inner xmlns="urn:d">t</inner>"#
        );
    }

    #[test]
    fn text_escaping_follows_c14n() {
        let doc = Document::parse("<a>x &amp; y</a>").unwrap();
        assert_eq!(exclusive_c14n(&doc.root, &doc, false), "<a>x &amp; y</a>");
    }

    #[test]
    fn canonical_form_is_idempotent() {
        let xml = concat!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r" Version="2.0">"#,
            r#"<saml:Issuer>idp</saml:Issuer>"#,
            r#"<saml:Assertion ID="_a"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#,
            r#"</samlp:Response>"#
        );
        let doc = Document::parse(xml).unwrap();
        let first = exclusive_c14n(&doc.root, &doc, false);
        let doc2 = Document::parse(&first).unwrap();
        assert_eq!(exclusive_c14n(&doc2.root, &doc2, false), first);
    }

    #[test]
    fn subtree_digest_form_survives_detach_and_reparse() {
        // Canonicalize a subtree, parse it standalone, canonicalize again:
        // the bytes must not change. Signature verification of decrypted
        // assertions depends on this.
        let xml = concat!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r">"#,
            r#"<saml:Assertion ID="_a" Version="2.0"><saml:Issuer>idp</saml:Issuer></saml:Assertion>"#,
            r#"</samlp:Response>"#
        );
        let doc = Document::parse(xml).unwrap();
        let assertion = doc
            .root
            .find_child("urn:oasis:names:tc:SAML:2.0:assertion", "Assertion")
            .unwrap();
        let detached = exclusive_c14n(assertion, &doc, false);

        let standalone = Document::parse(&detached).unwrap();
        assert_eq!(exclusive_c14n(&standalone.root, &standalone, false), detached);
    }
}
