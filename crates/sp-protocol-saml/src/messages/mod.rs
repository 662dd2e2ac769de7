//! Outbound message builders and inbound message parsers.
//!
//! The three message families share only ID / IssueInstant / Issuer
//! assembly; each keeps its own builder. Outbound XML is emitted in a
//! single line with every namespace declared on the root, which keeps the
//! canonicalized form stable for signing.

mod authn_request;
mod logout_request;
mod logout_response;

pub use authn_request::{AuthnRequest, AuthnRequestOptions};
pub use logout_request::{LogoutRequest, LogoutRequestOptions, ParsedLogoutRequest};
pub use logout_response::{LogoutResponse, ParsedLogoutResponse};

use serde::{Deserialize, Serialize};

use crate::xml::dom::{escape_attr, escape_text, Element};

/// A subject name identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,
    /// Format URI.
    pub format: Option<String>,
    /// Qualifier of the issuing domain.
    pub name_qualifier: Option<String>,
    /// Qualifier naming the service provider.
    pub sp_name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a name ID with the given value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Sets the format URI.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Renders as a `<saml:NameID>` fragment (the `saml` prefix must be
    /// declared by the enclosing document).
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut attrs = String::new();
        if let Some(format) = &self.format {
            attrs.push_str(&format!(r#" Format="{}""#, escape_attr(format)));
        }
        if let Some(nq) = &self.name_qualifier {
            attrs.push_str(&format!(r#" NameQualifier="{}""#, escape_attr(nq)));
        }
        if let Some(spnq) = &self.sp_name_qualifier {
            attrs.push_str(&format!(r#" SPNameQualifier="{}""#, escape_attr(spnq)));
        }
        format!(
            "<saml:NameID{attrs}>{}</saml:NameID>",
            escape_text(&self.value)
        )
    }

    /// Extracts a name ID from a parsed `<NameID>` element.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        Self {
            value: element.text(),
            format: element.attr("Format").map(str::to_string),
            name_qualifier: element.attr("NameQualifier").map(str::to_string),
            sp_name_qualifier: element.attr("SPNameQualifier").map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SAML_NS;
    use crate::xml::dom::Document;

    #[test]
    fn name_id_xml_roundtrip() {
        let name_id = NameId::new("alice@example")
            .with_format("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress")
            .with_sp_name_qualifier("https://sp.example/meta");

        let xml = format!(
            r#"<root xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">{}</root>"#,
            name_id.to_xml()
        );
        let doc = Document::parse(&xml).unwrap();
        let parsed = NameId::from_element(doc.root.find_child(SAML_NS, "NameID").unwrap());
        assert_eq!(parsed, name_id);
    }

    #[test]
    fn name_id_escapes_value() {
        let name_id = NameId::new("a<b&c");
        assert!(name_id.to_xml().contains("a&lt;b&amp;c"));
    }
}
