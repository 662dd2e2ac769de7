//! Structural schema pass.
//!
//! A lightweight stand-in for full XSD validation: checks the element
//! placement, required attributes, and cardinalities the SAML 2.0 protocol
//! schema mandates for the messages this SP consumes. Enabled through the
//! `want_xml_validation` toggle.

use sp_core::{ErrorKind, SpError, SpResult};

use crate::constants::{SAMLP_NS, SAML_NS, XENC_NS};
use crate::xml::dom::{Document, Element};

fn violation(detail: impl Into<String>) -> SpError {
    SpError::new(ErrorKind::SchemaViolation, detail)
}

fn check_message_attributes(el: &Element, what: &str) -> SpResult<()> {
    if el.attr("ID").map_or(true, str::is_empty) {
        return Err(violation(format!("{what} is missing its ID attribute")));
    }
    match el.attr("Version") {
        Some("2.0") => {}
        Some(other) => {
            return Err(violation(format!("{what} has unsupported version {other:?}")));
        }
        None => return Err(violation(format!("{what} is missing its Version attribute"))),
    }
    if el.attr("IssueInstant").map_or(true, str::is_empty) {
        return Err(violation(format!("{what} is missing IssueInstant")));
    }
    Ok(())
}

fn check_status(el: &Element, what: &str) -> SpResult<()> {
    let status = el
        .find_child(SAMLP_NS, "Status")
        .ok_or_else(|| violation(format!("{what} has no Status")))?;
    if status.find_child(SAMLP_NS, "StatusCode").is_none() {
        return Err(violation(format!("{what} Status has no StatusCode")));
    }
    Ok(())
}

/// Validates the structure of a `<samlp:Response>`.
pub fn validate_response(doc: &Document) -> SpResult<()> {
    let root = &doc.root;
    if !root.is(SAMLP_NS, "Response") {
        return Err(violation("document element is not samlp:Response"));
    }
    check_message_attributes(root, "Response")?;
    check_status(root, "Response")?;

    for assertion in root.find_children(SAML_NS, "Assertion") {
        check_message_attributes(assertion, "Assertion")?;
        if assertion.find_child(SAML_NS, "Issuer").is_none() {
            return Err(violation("Assertion has no Issuer"));
        }
    }
    for encrypted in root.find_children(SAML_NS, "EncryptedAssertion") {
        if encrypted.find_child(XENC_NS, "EncryptedData").is_none() {
            return Err(violation("EncryptedAssertion has no EncryptedData"));
        }
    }
    Ok(())
}

/// Validates the structure of a `<samlp:LogoutRequest>`.
pub fn validate_logout_request(doc: &Document) -> SpResult<()> {
    let root = &doc.root;
    if !root.is(SAMLP_NS, "LogoutRequest") {
        return Err(violation("document element is not samlp:LogoutRequest"));
    }
    check_message_attributes(root, "LogoutRequest")?;
    let has_name_id = root.find_child(SAML_NS, "NameID").is_some()
        || root.find_child(SAML_NS, "EncryptedID").is_some()
        || root.find_child(SAML_NS, "BaseID").is_some();
    if !has_name_id {
        return Err(violation("LogoutRequest has no NameID"));
    }
    Ok(())
}

/// Validates the structure of a `<samlp:LogoutResponse>`.
pub fn validate_logout_response(doc: &Document) -> SpResult<()> {
    let root = &doc.root;
    if !root.is(SAMLP_NS, "LogoutResponse") {
        return Err(violation("document element is not samlp:LogoutResponse"));
    }
    check_message_attributes(root, "LogoutResponse")?;
    check_status(root, "LogoutResponse")
}
