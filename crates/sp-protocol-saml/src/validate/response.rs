//! The Response validation pipeline.
//!
//! Follows the POST-binding rules: decode, parse, structural checks,
//! decryption, signature-wrapping defenses, signature verification, and
//! only then data extraction from the verified subtree. The extracted
//! session data is returned only when the error list is empty.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sp_core::{Clock, ErrorKind, Settings, SpError};
use sp_crypto::keys::normalize_fingerprint;

use crate::bindings::HttpPostBinding;
use crate::constants::{status_codes, CM_BEARER, DS_NS, SAMLP_NS, SAML_NS};
use crate::crypt;
use crate::instant::parse_instant;
use crate::messages::NameId;
use crate::sign::xmldsig::{verify_enveloped, TrustAnchors};
use crate::validate::{url_eq, Collector};
use crate::xml::dom::{Document, Element, XmlNode};
use crate::xml::schema;

/// Session data extracted from a valid Response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Subject NameID value.
    pub name_id: Option<String>,
    /// Subject NameID format.
    pub name_id_format: Option<String>,
    /// Subject NameID NameQualifier.
    pub name_id_name_qualifier: Option<String>,
    /// Subject NameID SPNameQualifier.
    pub name_id_sp_name_qualifier: Option<String>,
    /// Attributes keyed by `Name`.
    pub attributes: HashMap<String, Vec<String>>,
    /// Attributes keyed by `FriendlyName`.
    pub attributes_with_friendly_name: HashMap<String, Vec<String>>,
    /// Session index from the AuthnStatement.
    pub session_index: Option<String>,
    /// SessionNotOnOrAfter from the AuthnStatement.
    pub session_expiration: Option<DateTime<Utc>>,
    /// The Response message ID.
    pub response_id: String,
    /// The consumed Assertion ID (replay hook).
    pub assertion_id: String,
    /// Smallest valid bearer NotOnOrAfter (replay hook).
    pub assertion_not_on_or_after: Option<DateTime<Utc>>,
    /// Response-level InResponseTo.
    pub in_response_to: Option<String>,
    /// The response XML after decryption; what diagnostics should show.
    pub response_xml: String,
}

/// Validator for `<samlp:Response>` messages received on the POST binding.
pub struct ResponseValidator<'a> {
    settings: &'a Settings,
    clock: &'a dyn Clock,
}

impl<'a> ResponseValidator<'a> {
    /// Creates a validator over frozen settings and an injected clock.
    pub fn new(settings: &'a Settings, clock: &'a dyn Clock) -> Self {
        Self { settings, clock }
    }

    /// Runs the pipeline. `request_id` is the AuthnRequest ID this response
    /// is expected to answer, when the SP initiated the exchange.
    pub fn validate(
        &self,
        saml_response_b64: &str,
        request_id: Option<&str>,
    ) -> Result<ResponseData, Vec<SpError>> {
        let mut col = Collector::new(self.settings.strict);
        let mut data = ResponseData::default();

        // Decode and parse; nothing can proceed without a document.
        let xml = match HttpPostBinding::decode(saml_response_b64) {
            Ok(xml) => xml,
            Err(e) => return Err(vec![e]),
        };
        let mut doc = match Document::parse(&xml) {
            Ok(doc) => doc,
            Err(e) => return Err(vec![e]),
        };
        if !doc.root.is(SAMLP_NS, "Response") {
            let kind = if doc.root.local == "Response" {
                ErrorKind::InvalidXmlNamespace
            } else {
                ErrorKind::InvalidXml
            };
            return Err(vec![SpError::new(kind, "document element is not samlp:Response")]);
        }
        data.response_xml = xml;

        if self.settings.security.want_xml_validation
            && col.check(schema::validate_response(&doc))
        {
            return Err(col.into_errors());
        }

        if col.check(self.check_status(&doc.root)) {
            return Err(col.into_errors());
        }

        // Decrypt and enforce the assertion singleton.
        match self.decrypt_in_place(&mut doc) {
            Ok(Some(decrypted_xml)) => data.response_xml = decrypted_xml,
            Ok(None) => {}
            Err(e) => {
                col.push(e);
                return Err(col.into_errors());
            }
        }
        let assertions = doc.root.find_children(SAML_NS, "Assertion");
        let assertion = match assertions.as_slice() {
            [one] => *one,
            other => {
                col.push(SpError::new(
                    ErrorKind::InvalidXml,
                    format!("expected exactly one Assertion, found {}", other.len()),
                ));
                return Err(col.into_errors());
            }
        };
        let (Some(response_id), Some(assertion_id)) =
            (doc.root.attr("ID"), assertion.attr("ID"))
        else {
            col.push(SpError::new(
                ErrorKind::InvalidXml,
                "Response and Assertion must both carry an ID",
            ));
            return Err(col.into_errors());
        };
        data.response_id = response_id.to_string();
        data.assertion_id = assertion_id.to_string();
        data.in_response_to = doc.root.attr("InResponseTo").map(str::to_string);

        // Signature-wrapping defense: the only signatures allowed in the
        // document are the ones enveloped in the two elements we consume.
        let response_signed = doc.root.find_child(DS_NS, "Signature").is_some();
        let assertion_signed = assertion.find_child(DS_NS, "Signature").is_some();
        let expected_signatures =
            usize::from(response_signed) + usize::from(assertion_signed);
        if doc.root.find_descendants(DS_NS, "Signature").len() != expected_signatures {
            col.push(SpError::new(
                ErrorKind::InvalidSignature,
                "found a Signature outside the Response and Assertion envelopes",
            ));
            return Err(col.into_errors());
        }

        if self.settings.security.want_assertions_signed && !assertion_signed {
            if col.push(SpError::new(
                ErrorKind::NoSignedElement,
                "the Assertion is required to be signed",
            )) {
                return Err(col.into_errors());
            }
        }
        if self.settings.security.want_messages_signed && !response_signed {
            if col.push(SpError::new(
                ErrorKind::NoSignedElement,
                "the Response is required to be signed",
            )) {
                return Err(col.into_errors());
            }
        }
        if !response_signed && !assertion_signed {
            col.push(SpError::new(
                ErrorKind::NoSignedElement,
                "neither the Response nor the Assertion is signed",
            ));
            return Err(col.into_errors());
        }

        // Each present signature verifies independently; one never vouches
        // for the other.
        let certificates = match self.settings.idp_certificates() {
            Ok(certs) => certs,
            Err(e) => {
                col.push(e);
                return Err(col.into_errors());
            }
        };
        let fingerprints: Vec<String> = self
            .settings
            .idp
            .cert_fingerprints
            .iter()
            .map(|f| normalize_fingerprint(f))
            .collect();
        let anchors = TrustAnchors {
            certificates: &certificates,
            fingerprints: &fingerprints,
            fingerprint_algorithm: self.settings.idp.cert_fingerprint_algorithm,
        };
        let reject_deprecated = self.settings.security.reject_deprecated_algorithm;
        if response_signed
            && col.check(
                verify_enveloped(&doc, &doc.root, &anchors, reject_deprecated).map(|_| ()),
            )
        {
            return Err(col.into_errors());
        }
        if assertion_signed
            && col.check(verify_enveloped(&doc, assertion, &anchors, reject_deprecated).map(|_| ()))
        {
            return Err(col.into_errors());
        }

        // From here on, extraction reads only the verified subtree.
        if col.check(self.check_issuers(&doc.root, assertion)) {
            return Err(col.into_errors());
        }
        let conditions = assertion.find_child(SAML_NS, "Conditions");
        if col.check(self.check_audience(conditions)) {
            return Err(col.into_errors());
        }
        if col.check(self.check_conditions_window(conditions)) {
            return Err(col.into_errors());
        }
        if col.check(self.check_destination(&doc.root)) {
            return Err(col.into_errors());
        }
        if col.check(self.check_in_response_to(&doc.root, request_id)) {
            return Err(col.into_errors());
        }

        let subject = assertion.find_child(SAML_NS, "Subject");
        match self.check_subject_confirmation(subject, data.in_response_to.as_deref()) {
            Ok(best) => data.assertion_not_on_or_after = best,
            Err(e) => {
                if col.push(e) {
                    return Err(col.into_errors());
                }
            }
        }

        match self.extract_authn_statement(assertion) {
            Ok((session_index, session_expiration)) => {
                data.session_index = session_index;
                data.session_expiration = session_expiration;
            }
            Err(e) => {
                if col.push(e) {
                    return Err(col.into_errors());
                }
            }
        }

        if self.extract_attributes(assertion, &mut data, &mut col) {
            return Err(col.into_errors());
        }

        if self.extract_name_id(subject, &mut data, &mut col) {
            return Err(col.into_errors());
        }

        if col.is_clean() {
            Ok(data)
        } else {
            Err(col.into_errors())
        }
    }

    fn check_status(&self, root: &Element) -> Result<(), SpError> {
        let status = root
            .find_child(SAMLP_NS, "Status")
            .ok_or_else(|| SpError::new(ErrorKind::ResponseStatusError, "Response has no Status"))?;
        let code = status
            .find_child(SAMLP_NS, "StatusCode")
            .and_then(|c| c.attr("Value"))
            .ok_or_else(|| {
                SpError::new(ErrorKind::ResponseStatusError, "Response has no StatusCode")
            })?;
        if code == status_codes::SUCCESS {
            return Ok(());
        }

        let sub_code = status
            .find_child(SAMLP_NS, "StatusCode")
            .and_then(|c| c.find_child(SAMLP_NS, "StatusCode"))
            .and_then(|c| c.attr("Value"));
        let message = status
            .find_child(SAMLP_NS, "StatusMessage")
            .map(|m| m.text());

        let mut detail = format!("IdP returned status {code}");
        if let Some(sub) = sub_code {
            detail.push_str(&format!(", sub-status {sub}"));
        }
        if let Some(msg) = message.filter(|m| !m.is_empty()) {
            detail.push_str(&format!(": {msg}"));
        }
        Err(SpError::new(ErrorKind::ResponseStatusError, detail))
    }

    /// Replaces an `<EncryptedAssertion>` with its plaintext and reparses.
    /// Returns the new document XML when decryption happened.
    fn decrypt_in_place(&self, doc: &mut Document) -> Result<Option<String>, SpError> {
        let encrypted = doc.root.find_children(SAML_NS, "EncryptedAssertion");
        match encrypted.len() {
            0 => {
                if self.settings.security.want_assertions_encrypted {
                    return Err(SpError::new(
                        ErrorKind::EncryptionError,
                        "the Assertion was required to arrive encrypted",
                    ));
                }
                return Ok(None);
            }
            1 => {}
            n => {
                return Err(SpError::new(
                    ErrorKind::InvalidXml,
                    format!("found {n} EncryptedAssertion elements, at most one is allowed"),
                ));
            }
        }

        let key = self.settings.sp_private_key()?;
        let plain = {
            let encrypted = encrypted[0];
            crypt::decrypt_element(
                encrypted,
                &key,
                self.settings.security.reject_deprecated_algorithm,
            )?
        };
        if !plain.is(SAML_NS, "Assertion") {
            return Err(SpError::new(
                ErrorKind::DecryptionError,
                "EncryptedAssertion did not decrypt to an Assertion",
            ));
        }

        let position = doc
            .root
            .children
            .iter()
            .position(|n| matches!(n, XmlNode::Element(e) if e.is(SAML_NS, "EncryptedAssertion")))
            .ok_or_else(|| {
                SpError::new(ErrorKind::DecryptionError, "EncryptedAssertion vanished")
            })?;
        doc.root.children[position] = XmlNode::Element(plain);

        let new_xml = doc.to_xml();
        *doc = Document::parse(&new_xml)?;
        Ok(Some(new_xml))
    }

    fn check_issuers(&self, root: &Element, assertion: &Element) -> Result<(), SpError> {
        let expected = &self.settings.idp.entity_id;

        let response_issuers = root.find_children(SAML_NS, "Issuer");
        match response_issuers.as_slice() {
            [] => {}
            [one] => {
                let issuer = one.text();
                if issuer != *expected {
                    return Err(SpError::new(
                        ErrorKind::InvalidIssuer,
                        format!("Response issuer {issuer:?}, expected {expected:?}"),
                    ));
                }
            }
            _ => {
                return Err(SpError::new(
                    ErrorKind::InvalidIssuer,
                    "Response carries multiple Issuer elements",
                ));
            }
        }

        let assertion_issuers = assertion.find_children(SAML_NS, "Issuer");
        match assertion_issuers.as_slice() {
            [one] => {
                let issuer = one.text();
                if issuer != *expected {
                    return Err(SpError::new(
                        ErrorKind::InvalidIssuer,
                        format!("Assertion issuer {issuer:?}, expected {expected:?}"),
                    ));
                }
                Ok(())
            }
            [] => Err(SpError::new(
                ErrorKind::InvalidIssuer,
                "Assertion has no Issuer",
            )),
            _ => Err(SpError::new(
                ErrorKind::InvalidIssuer,
                "Assertion carries multiple Issuer elements",
            )),
        }
    }

    fn check_audience(&self, conditions: Option<&Element>) -> Result<(), SpError> {
        let Some(conditions) = conditions else {
            return Ok(());
        };
        let restrictions = conditions.find_children(SAML_NS, "AudienceRestriction");
        if restrictions.is_empty() {
            return Ok(());
        }

        let audiences: Vec<String> = restrictions
            .iter()
            .flat_map(|r| r.find_children(SAML_NS, "Audience"))
            .map(|a| a.text())
            .collect();
        if audiences.iter().any(|a| a == &self.settings.sp.entity_id) {
            Ok(())
        } else {
            Err(SpError::new(
                ErrorKind::InvalidAudience,
                format!(
                    "audiences {audiences:?} do not include {:?}",
                    self.settings.sp.entity_id
                ),
            ))
        }
    }

    fn skew(&self) -> Duration {
        Duration::seconds(self.settings.security.allowed_clock_drift_secs)
    }

    fn check_conditions_window(&self, conditions: Option<&Element>) -> Result<(), SpError> {
        let Some(conditions) = conditions else {
            return Ok(());
        };
        let now = self.clock.now();

        if let Some(not_before) = conditions.attr("NotBefore") {
            let not_before = parse_instant(not_before)?;
            if not_before > now + self.skew() {
                return Err(SpError::new(
                    ErrorKind::AssertionTooEarly,
                    format!("assertion is not valid before {not_before}"),
                ));
            }
        }
        if let Some(not_on_or_after) = conditions.attr("NotOnOrAfter") {
            let not_on_or_after = parse_instant(not_on_or_after)?;
            if not_on_or_after <= now - self.skew() {
                return Err(SpError::new(
                    ErrorKind::AssertionExpired,
                    format!("assertion expired at {not_on_or_after}"),
                ));
            }
        }
        Ok(())
    }

    fn check_destination(&self, root: &Element) -> Result<(), SpError> {
        let Some(destination) = root.attr("Destination") else {
            return Ok(());
        };
        if destination.is_empty() {
            return Err(SpError::new(
                ErrorKind::InvalidDestination,
                "Response Destination is empty",
            ));
        }
        if !url_eq(destination, &self.settings.sp.acs_url) {
            return Err(SpError::new(
                ErrorKind::InvalidDestination,
                format!(
                    "Response destination {destination:?}, expected {:?}",
                    self.settings.sp.acs_url
                ),
            ));
        }
        Ok(())
    }

    fn check_in_response_to(
        &self,
        root: &Element,
        request_id: Option<&str>,
    ) -> Result<(), SpError> {
        let in_response_to = root.attr("InResponseTo");
        match request_id {
            Some(expected) => {
                if in_response_to != Some(expected) {
                    return Err(SpError::new(
                        ErrorKind::InvalidInResponseTo,
                        format!(
                            "Response InResponseTo {in_response_to:?}, expected {expected:?}"
                        ),
                    ));
                }
            }
            None => {
                if in_response_to.is_some()
                    && self
                        .settings
                        .security
                        .reject_unsolicited_responses_with_in_response_to
                {
                    return Err(SpError::new(
                        ErrorKind::UnexpectedInResponseTo,
                        "unsolicited Response carries InResponseTo",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validates the bearer subject confirmations and returns the smallest
    /// valid NotOnOrAfter.
    fn check_subject_confirmation(
        &self,
        subject: Option<&Element>,
        response_in_response_to: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, SpError> {
        let Some(subject) = subject else {
            return Err(SpError::new(
                ErrorKind::InvalidXml,
                "Assertion has no Subject",
            ));
        };

        let now = self.clock.now();
        let mut best: Option<DateTime<Utc>> = None;
        let mut last_failure: Option<SpError> = None;

        for confirmation in subject.find_children(SAML_NS, "SubjectConfirmation") {
            if confirmation.attr("Method") != Some(CM_BEARER) {
                continue;
            }
            let Some(scd) = confirmation.find_child(SAML_NS, "SubjectConfirmationData") else {
                last_failure = Some(SpError::new(
                    ErrorKind::InvalidXml,
                    "bearer SubjectConfirmation has no SubjectConfirmationData",
                ));
                continue;
            };

            match scd.attr("Recipient") {
                Some(recipient) if url_eq(recipient, &self.settings.sp.acs_url) => {}
                Some(recipient) => {
                    last_failure = Some(SpError::new(
                        ErrorKind::InvalidDestination,
                        format!(
                            "bearer Recipient {recipient:?}, expected {:?}",
                            self.settings.sp.acs_url
                        ),
                    ));
                    continue;
                }
                None => {
                    last_failure = Some(SpError::new(
                        ErrorKind::InvalidDestination,
                        "bearer SubjectConfirmationData has no Recipient",
                    ));
                    continue;
                }
            }

            if scd.attr("NotBefore").is_some() {
                last_failure = Some(SpError::new(
                    ErrorKind::AssertionTooEarly,
                    "bearer SubjectConfirmationData must not carry NotBefore",
                ));
                continue;
            }

            if let Some(irt) = scd.attr("InResponseTo") {
                if Some(irt) != response_in_response_to {
                    last_failure = Some(SpError::new(
                        ErrorKind::InvalidInResponseTo,
                        format!(
                            "SubjectConfirmationData InResponseTo {irt:?} does not match the Response"
                        ),
                    ));
                    continue;
                }
            }

            let Some(not_on_or_after) = scd.attr("NotOnOrAfter") else {
                last_failure = Some(SpError::new(
                    ErrorKind::AssertionExpired,
                    "bearer SubjectConfirmationData has no NotOnOrAfter",
                ));
                continue;
            };
            let not_on_or_after = parse_instant(not_on_or_after)?;
            if not_on_or_after <= now - self.skew() {
                last_failure = Some(SpError::new(
                    ErrorKind::AssertionExpired,
                    format!("bearer window closed at {not_on_or_after}"),
                ));
                continue;
            }

            best = Some(match best {
                Some(current) if current <= not_on_or_after => current,
                _ => not_on_or_after,
            });
        }

        match best {
            Some(_) => Ok(best),
            None => Err(last_failure.unwrap_or_else(|| {
                SpError::new(
                    ErrorKind::InvalidXml,
                    "no bearer SubjectConfirmation was found",
                )
            })),
        }
    }

    fn extract_authn_statement(
        &self,
        assertion: &Element,
    ) -> Result<(Option<String>, Option<DateTime<Utc>>), SpError> {
        let statements = assertion.find_children(SAML_NS, "AuthnStatement");
        let statement = match statements.as_slice() {
            [one] => *one,
            other => {
                return Err(SpError::new(
                    ErrorKind::NoAuthnStatement,
                    format!("expected exactly one AuthnStatement, found {}", other.len()),
                ));
            }
        };

        let session_index = statement.attr("SessionIndex").map(str::to_string);
        let session_expiration = statement
            .attr("SessionNotOnOrAfter")
            .map(parse_instant)
            .transpose()?;
        Ok((session_index, session_expiration))
    }

    /// Returns true when the pipeline must abort.
    fn extract_attributes(
        &self,
        assertion: &Element,
        data: &mut ResponseData,
        col: &mut Collector,
    ) -> bool {
        let strict = self.settings.strict;

        for statement in assertion.find_children(SAML_NS, "AttributeStatement") {
            let attributes = statement.find_children(SAML_NS, "Attribute");
            if attributes.is_empty()
                && statement
                    .find_children(SAML_NS, "EncryptedAttribute")
                    .is_empty()
                && col.push(SpError::new(
                    ErrorKind::NoAttributeStatements,
                    "AttributeStatement carries no Attribute",
                ))
            {
                return true;
            }

            for attribute in attributes {
                let Some(name) = attribute.attr("Name").filter(|n| !n.is_empty()) else {
                    if col.push(SpError::new(
                        ErrorKind::InvalidXml,
                        "Attribute has no Name",
                    )) {
                        return true;
                    }
                    continue;
                };

                let values: Vec<String> = attribute
                    .find_children(SAML_NS, "AttributeValue")
                    .iter()
                    .map(|v| v.text())
                    .collect();

                if let Some(existing) = data.attributes.get_mut(name) {
                    // Duplicate names are a hard error in strict mode and
                    // concatenate otherwise.
                    if strict {
                        if col.push(SpError::new(
                            ErrorKind::InvalidXml,
                            format!("duplicated attribute {name:?}"),
                        )) {
                            return true;
                        }
                    } else {
                        existing.extend(values.iter().cloned());
                    }
                } else {
                    data.attributes.insert(name.to_string(), values.clone());
                }

                if let Some(friendly) = attribute.attr("FriendlyName").filter(|f| !f.is_empty()) {
                    if data.attributes_with_friendly_name.contains_key(friendly) && strict {
                        if col.push(SpError::new(
                            ErrorKind::InvalidXml,
                            format!("duplicated attribute FriendlyName {friendly:?}"),
                        )) {
                            return true;
                        }
                    } else {
                        // Non-strict keeps the last value seen.
                        data.attributes_with_friendly_name
                            .insert(friendly.to_string(), values);
                    }
                }
            }
        }
        false
    }

    /// Returns true when the pipeline must abort.
    fn extract_name_id(
        &self,
        subject: Option<&Element>,
        data: &mut ResponseData,
        col: &mut Collector,
    ) -> bool {
        let Some(subject) = subject else {
            // Already reported by the subject-confirmation pass.
            return false;
        };

        let name_id = if let Some(el) = subject.find_child(SAML_NS, "NameID") {
            if self.settings.security.want_name_id_encrypted {
                return col.push(SpError::new(
                    ErrorKind::EncryptionError,
                    "the NameID was required to arrive encrypted",
                ));
            }
            NameId::from_element(el)
        } else if let Some(encrypted) = subject.find_child(SAML_NS, "EncryptedID") {
            let key = match self.settings.sp_private_key() {
                Ok(key) => key,
                Err(e) => return col.push(e),
            };
            match crypt::decrypt_element(
                encrypted,
                &key,
                self.settings.security.reject_deprecated_algorithm,
            ) {
                Ok(plain) if plain.is(SAML_NS, "NameID") => NameId::from_element(&plain),
                Ok(_) => {
                    return col.push(SpError::new(
                        ErrorKind::DecryptionError,
                        "EncryptedID did not decrypt to a NameID",
                    ));
                }
                Err(e) => return col.push(e),
            }
        } else {
            return col.push(SpError::new(
                ErrorKind::InvalidNameId,
                "Subject carries no NameID",
            ));
        };

        if name_id.value.is_empty() {
            return col.push(SpError::new(ErrorKind::InvalidNameId, "empty NameID value"));
        }

        let expected_format = &self.settings.sp.name_id_format;
        if expected_format != crate::constants::NameIdFormat::Unspecified.uri()
            && expected_format != crate::constants::NameIdFormat::Encrypted.uri()
        {
            if let Some(format) = &name_id.format {
                if format != expected_format
                    && col.push(SpError::new(
                        ErrorKind::InvalidNameIdFormat,
                        format!("NameID format {format:?}, expected {expected_format:?}"),
                    ))
                {
                    return true;
                }
            }
        }
        if let Some(spnq) = &name_id.sp_name_qualifier {
            if spnq != &self.settings.sp.entity_id
                && col.push(SpError::new(
                    ErrorKind::InvalidNameId,
                    format!("SPNameQualifier {spnq:?} does not name this SP"),
                ))
            {
                return true;
            }
        }

        data.name_id = Some(name_id.value);
        data.name_id_format = name_id.format;
        data.name_id_name_qualifier = name_id.name_qualifier;
        data.name_id_sp_name_qualifier = name_id.sp_name_qualifier;
        false
    }
}

#[cfg(test)]
mod tests {
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use sp_core::{FixedClock, IdpSettings, SpSettings};
    use sp_crypto::{BlockCipher, Certificate, DigestAlgorithm, KeyTransport, PrivateKey, SignatureAlgorithm};

    use super::*;
    use crate::sign::xmldsig::sign_xml;
    use crate::xml::c14n::exclusive_c14n;

    const NOW: &str = "2024-06-01T12:00:00Z";

    fn keypair(cn: &str) -> (PrivateKey, Certificate, String) {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let pem = String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let mut name = openssl::x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", cn).unwrap();
        let name = name.build();
        let mut builder = openssl::x509::X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder
            .sign(&pkey, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let cert = builder.build();
        let cert_pem = String::from_utf8(cert.to_pem().unwrap()).unwrap();

        (
            PrivateKey::from_pem(&pem).unwrap(),
            Certificate::from_der(cert.to_der().unwrap()).unwrap(),
            cert_pem,
        )
    }

    struct Fixture {
        idp_key: PrivateKey,
        idp_cert: Certificate,
        settings: Settings,
    }

    impl Fixture {
        fn new() -> Self {
            let (idp_key, idp_cert, idp_cert_pem) = keypair("idp");
            let sp = SpSettings::new("https://sp.example/meta", "https://sp.example/acs");
            let mut idp = IdpSettings::new("https://idp.example/meta", "https://idp.example/sso");
            idp.certificates = vec![idp_cert_pem];
            let settings = Settings::new(sp, idp).unwrap();
            Self {
                idp_key,
                idp_cert,
                settings,
            }
        }

        fn clock(&self) -> FixedClock {
            FixedClock(NOW.parse().unwrap())
        }

        fn validate(&self, b64: &str, request_id: Option<&str>) -> Result<ResponseData, Vec<SpError>> {
            let clock = self.clock();
            ResponseValidator::new(&self.settings, &clock).validate(b64, request_id)
        }

        fn sign_assertion(&self, xml: &str) -> String {
            sign_xml(
                xml,
                "_asrt001",
                &self.idp_key,
                Some(&self.idp_cert),
                SignatureAlgorithm::RsaSha256,
                DigestAlgorithm::Sha256,
            )
            .unwrap()
        }

        fn sign_response(&self, xml: &str) -> String {
            sign_xml(
                xml,
                "_resp001",
                &self.idp_key,
                Some(&self.idp_cert),
                SignatureAlgorithm::RsaSha256,
                DigestAlgorithm::Sha256,
            )
            .unwrap()
        }
    }

    struct Message {
        issuer: String,
        destination: Option<String>,
        status: String,
        in_response_to: Option<String>,
        audience: String,
        recipient: String,
        scd_not_on_or_after: String,
        scd_in_response_to: Option<String>,
        not_before: Option<String>,
        not_on_or_after: Option<String>,
        name_id: String,
        session_index: String,
        attributes: Vec<(String, Vec<String>, Option<String>)>,
    }

    impl Default for Message {
        fn default() -> Self {
            Self {
                issuer: "https://idp.example/meta".to_string(),
                destination: Some("https://sp.example/acs".to_string()),
                status: status_codes::SUCCESS.to_string(),
                in_response_to: None,
                audience: "https://sp.example/meta".to_string(),
                recipient: "https://sp.example/acs".to_string(),
                scd_not_on_or_after: "2024-06-01T12:05:00Z".to_string(),
                scd_in_response_to: None,
                not_before: Some("2024-06-01T11:55:00Z".to_string()),
                not_on_or_after: Some("2024-06-01T12:05:00Z".to_string()),
                name_id: "alice@example".to_string(),
                session_index: "_s1".to_string(),
                attributes: vec![("uid".to_string(), vec!["alice".to_string()], None)],
            }
        }
    }

    impl Message {
        fn build(&self) -> String {
            let destination = self
                .destination
                .as_deref()
                .map(|d| format!(r#" Destination="{d}""#))
                .unwrap_or_default();
            let in_response_to = self
                .in_response_to
                .as_deref()
                .map(|i| format!(r#" InResponseTo="{i}""#))
                .unwrap_or_default();
            let scd_irt = self
                .scd_in_response_to
                .as_deref()
                .map(|i| format!(r#" InResponseTo="{i}""#))
                .unwrap_or_default();
            let not_before = self
                .not_before
                .as_deref()
                .map(|t| format!(r#" NotBefore="{t}""#))
                .unwrap_or_default();
            let not_on_or_after = self
                .not_on_or_after
                .as_deref()
                .map(|t| format!(r#" NotOnOrAfter="{t}""#))
                .unwrap_or_default();

            let attributes: String = self
                .attributes
                .iter()
                .map(|(name, values, friendly)| {
                    let friendly = friendly
                        .as_deref()
                        .map(|f| format!(r#" FriendlyName="{f}""#))
                        .unwrap_or_default();
                    let values: String = values
                        .iter()
                        .map(|v| format!("<saml:AttributeValue>{v}</saml:AttributeValue>"))
                        .collect();
                    format!(r#"<saml:Attribute Name="{name}"{friendly}>{values}</saml:Attribute>"#)
                })
                .collect();

            format!(
                concat!(
                    r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                    r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                    r#"ID="_resp001" Version="2.0" IssueInstant="{now}"{destination}{irt}>"#,
                    r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                    r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                    r#"<saml:Assertion ID="_asrt001" Version="2.0" IssueInstant="{now}">"#,
                    r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                    r#"<saml:Subject>"#,
                    r#"<saml:NameID>{name_id}</saml:NameID>"#,
                    r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
                    r#"<saml:SubjectConfirmationData Recipient="{recipient}" NotOnOrAfter="{scd_noa}"{scd_irt}/>"#,
                    r#"</saml:SubjectConfirmation>"#,
                    r#"</saml:Subject>"#,
                    r#"<saml:Conditions{not_before}{not_on_or_after}>"#,
                    r#"<saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction>"#,
                    r#"</saml:Conditions>"#,
                    r#"<saml:AuthnStatement AuthnInstant="{now}" SessionIndex="{session_index}">"#,
                    r#"<saml:AuthnContext><saml:AuthnContextClassRef>"#,
                    r#"urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport"#,
                    r#"</saml:AuthnContextClassRef></saml:AuthnContext>"#,
                    r#"</saml:AuthnStatement>"#,
                    r#"<saml:AttributeStatement>{attributes}</saml:AttributeStatement>"#,
                    r#"</saml:Assertion>"#,
                    r#"</samlp:Response>"#
                ),
                now = NOW,
                destination = destination,
                irt = in_response_to,
                issuer = self.issuer,
                status = self.status,
                name_id = self.name_id,
                recipient = self.recipient,
                scd_noa = self.scd_not_on_or_after,
                scd_irt = scd_irt,
                not_before = not_before,
                not_on_or_after = not_on_or_after,
                audience = self.audience,
                session_index = self.session_index,
                attributes = attributes,
            )
        }
    }

    fn encode(xml: &str) -> String {
        HttpPostBinding::encode(xml)
    }

    #[test]
    fn happy_post_sso() {
        let fx = Fixture::new();
        let signed = fx.sign_assertion(&Message::default().build());
        let data = fx.validate(&encode(&signed), None).unwrap();

        assert_eq!(data.name_id.as_deref(), Some("alice@example"));
        assert_eq!(data.attributes.get("uid").unwrap(), &["alice"]);
        assert_eq!(data.session_index.as_deref(), Some("_s1"));
        assert_eq!(data.response_id, "_resp001");
        assert_eq!(data.assertion_id, "_asrt001");
        assert_eq!(
            data.assertion_not_on_or_after,
            Some("2024-06-01T12:05:00Z".parse().unwrap())
        );
    }

    #[test]
    fn response_level_signature_is_accepted() {
        let fx = Fixture::new();
        let signed = fx.sign_response(&Message::default().build());
        fx.validate(&encode(&signed), None).unwrap();
    }

    #[test]
    fn both_signatures_verify_independently() {
        let mut fx = Fixture::new();
        fx.settings.security.want_messages_signed = true;
        fx.settings.security.want_assertions_signed = true;

        let signed = fx.sign_response(&fx.sign_assertion(&Message::default().build()));
        fx.validate(&encode(&signed), None).unwrap();

        // Response signature alone must not satisfy the assertion rule.
        let only_response = fx.sign_response(&Message::default().build());
        let errors = fx.validate(&encode(&only_response), None).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::NoSignedElement);
    }

    #[test]
    fn tampered_attribute_fails_with_invalid_signature() {
        let fx = Fixture::new();
        let signed = fx.sign_assertion(&Message::default().build());
        let tampered = signed.replace(">alice<", ">mallory<");
        let errors = fx.validate(&encode(&tampered), None).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn expired_assertion_is_rejected_with_strict_inequality() {
        let fx = Fixture::new();

        // NotOnOrAfter == now: rejected.
        let mut message = Message::default();
        message.not_on_or_after = Some(NOW.to_string());
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::AssertionExpired);

        // NotOnOrAfter == now + 1s: accepted.
        let mut message = Message::default();
        message.not_on_or_after = Some("2024-06-01T12:00:01Z".to_string());
        fx.validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap();
    }

    #[test]
    fn clock_drift_tolerance_is_honored() {
        let mut fx = Fixture::new();
        fx.settings.security.allowed_clock_drift_secs = 30;
        let mut message = Message::default();
        message.not_on_or_after = Some(NOW.to_string());
        fx.validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap();
    }

    #[test]
    fn not_before_in_the_future_is_rejected() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.not_before = Some("2024-06-01T12:01:00Z".to_string());
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::AssertionTooEarly);
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.audience = "https://other.example/meta".to_string();
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidAudience);
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.issuer = "https://evil.example/meta".to_string();
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidIssuer);
    }

    #[test]
    fn wrong_destination_is_rejected() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.destination = Some("https://other.example/acs".to_string());
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidDestination);
    }

    #[test]
    fn trailing_slash_on_destination_is_tolerated() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.destination = Some("https://sp.example/acs/".to_string());
        fx.validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap();
    }

    #[test]
    fn in_response_to_must_match_the_request() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.in_response_to = Some("_req42".to_string());
        let signed = fx.sign_assertion(&message.build());

        fx.validate(&encode(&signed), Some("_req42")).unwrap();

        let errors = fx.validate(&encode(&signed), Some("_other")).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidInResponseTo);
    }

    #[test]
    fn unsolicited_in_response_to_is_rejected_when_configured() {
        let mut fx = Fixture::new();
        fx.settings
            .security
            .reject_unsolicited_responses_with_in_response_to = true;
        let mut message = Message::default();
        message.in_response_to = Some("_req42".to_string());
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::UnexpectedInResponseTo);
    }

    #[test]
    fn subject_confirmation_in_response_to_must_match() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.in_response_to = Some("_req42".to_string());
        message.scd_in_response_to = Some("_forged".to_string());
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), Some("_req42"))
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidInResponseTo);
    }

    #[test]
    fn failure_status_is_reported_with_detail() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.status = "urn:oasis:names:tc:SAML:2.0:status:Responder".to_string();
        let errors = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::ResponseStatusError);
        assert!(errors[0].detail.contains("Responder"));
    }

    #[test]
    fn unsigned_response_is_rejected() {
        let fx = Fixture::new();
        let errors = fx
            .validate(&encode(&Message::default().build()), None)
            .unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::NoSignedElement);
    }

    #[test]
    fn forged_sibling_assertion_never_authenticates() {
        let fx = Fixture::new();
        let signed = fx.sign_assertion(&Message::default().build());

        // Same ID on the forged copy: duplicate-ID defense.
        let forged_same_id = signed.replace(
            "<saml:Assertion ",
            concat!(
                r#"<saml:Assertion ID="_asrt001" Version="2.0" IssueInstant="2024-06-01T12:00:00Z">"#,
                r#"<saml:Issuer>https://idp.example/meta</saml:Issuer>"#,
                r#"<saml:AttributeStatement><saml:Attribute Name="uid">"#,
                r#"<saml:AttributeValue>mallory</saml:AttributeValue>"#,
                r#"</saml:Attribute></saml:AttributeStatement>"#,
                r#"</saml:Assertion>"#,
                "<saml:Assertion "
            ),
        );
        assert!(fx.validate(&encode(&forged_same_id), None).is_err());

        // Distinct ID: the assertion singleton rule rejects it.
        let forged_new_id =
            forged_same_id.replacen(r#"<saml:Assertion ID="_asrt001""#, r#"<saml:Assertion ID="_forged""#, 1);
        assert!(fx.validate(&encode(&forged_new_id), None).is_err());
    }

    #[test]
    fn signature_outside_the_envelopes_is_rejected() {
        let fx = Fixture::new();
        let signed = fx.sign_assertion(&Message::default().build());
        // Graft a second copy of the signature into the AttributeStatement.
        let doc = Document::parse(&signed).unwrap();
        let assertion = doc.root.find_child(SAML_NS, "Assertion").unwrap();
        let sig = assertion.find_child(DS_NS, "Signature").unwrap();
        let grafted = signed.replace(
            "<saml:AttributeStatement>",
            &format!("<saml:AttributeStatement>{}", exclusive_c14n(sig, &doc, false)),
        );
        let errors = fx.validate(&encode(&grafted), None).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn duplicate_attribute_names_strict_vs_lax() {
        let mut fx = Fixture::new();
        let mut message = Message::default();
        message.attributes = vec![
            ("uid".to_string(), vec!["alice".to_string()], None),
            ("uid".to_string(), vec!["alice2".to_string()], None),
        ];
        let signed = fx.sign_assertion(&message.build());

        let errors = fx.validate(&encode(&signed), None).unwrap_err();
        assert!(errors.iter().any(|e| e.detail.contains("duplicated attribute")));

        fx.settings.set_strict(false);
        let data = fx.validate(&encode(&signed), None).unwrap();
        assert_eq!(data.attributes.get("uid").unwrap(), &["alice", "alice2"]);
    }

    #[test]
    fn friendly_names_are_indexed() {
        let fx = Fixture::new();
        let mut message = Message::default();
        message.attributes = vec![(
            "urn:oid:0.9.2342.19200300.100.1.1".to_string(),
            vec!["alice".to_string()],
            Some("uid".to_string()),
        )];
        let data = fx
            .validate(&encode(&fx.sign_assertion(&message.build())), None)
            .unwrap();
        assert_eq!(
            data.attributes_with_friendly_name.get("uid").unwrap(),
            &["alice"]
        );
    }

    #[test]
    fn fingerprint_only_trust_works() {
        let mut fx = Fixture::new();
        let fingerprint = fx.idp_cert.fingerprint(DigestAlgorithm::Sha256);
        fx.settings.idp.certificates = Vec::new();
        fx.settings.idp.cert_fingerprints = vec![fingerprint];
        fx.settings.idp.cert_fingerprint_algorithm = DigestAlgorithm::Sha256;

        let signed = fx.sign_assertion(&Message::default().build());
        fx.validate(&encode(&signed), None).unwrap();
    }

    #[test]
    fn encrypted_assertion_roundtrip() {
        let mut fx = Fixture::new();
        let (sp_key_pem, _, sp_cert_pem) = {
            let (key, _, cert_pem) = keypair("sp");
            (key.pem().to_string(), (), cert_pem)
        };
        fx.settings.sp.private_key = Some(sp_key_pem);
        let sp_cert = Certificate::from_pem(&sp_cert_pem).unwrap();

        // The IdP signs the assertion, then encrypts the signed assertion.
        let signed = fx.sign_assertion(&Message::default().build());
        let doc = Document::parse(&signed).unwrap();
        let assertion = doc.root.find_child(SAML_NS, "Assertion").unwrap();
        let standalone = exclusive_c14n(assertion, &doc, false);
        let encrypted = crate::crypt::encrypt_element(
            &standalone,
            &sp_cert,
            BlockCipher::Aes256Cbc,
            KeyTransport::RsaOaepMgf1p,
        )
        .unwrap();

        let mut shell = Message::default();
        shell.attributes = Vec::new();
        let shell_xml = shell.build();
        let start = shell_xml.find("<saml:Assertion").unwrap();
        let end = shell_xml.find("</saml:Assertion>").unwrap() + "</saml:Assertion>".len();
        let with_encrypted = format!(
            "{}<saml:EncryptedAssertion>{}</saml:EncryptedAssertion>{}",
            &shell_xml[..start],
            encrypted,
            &shell_xml[end..]
        );

        let data = fx.validate(&encode(&with_encrypted), None).unwrap();
        assert_eq!(data.name_id.as_deref(), Some("alice@example"));
        assert!(data.response_xml.contains("<saml:Assertion"));
        assert!(!data.response_xml.contains("EncryptedAssertion"));
    }

    #[test]
    fn missing_authn_statement_is_rejected() {
        let fx = Fixture::new();
        let xml = Message::default().build().replacen("<saml:AuthnStatement", "<saml:XAuthnStatement", 1)
            .replacen("</saml:AuthnStatement>", "</saml:XAuthnStatement>", 1);
        let signed = fx.sign_assertion(&xml);
        let errors = fx.validate(&encode(&signed), None).unwrap_err();
        assert!(errors.iter().any(|e| e.kind == ErrorKind::NoAuthnStatement));
    }
}
