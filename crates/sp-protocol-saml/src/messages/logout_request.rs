//! LogoutRequest construction and inbound parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_core::{Clock, ErrorKind, Settings, SpError, SpResult};
use sp_crypto::{random, Certificate, PrivateKey};

use crate::bindings::HttpRedirectBinding;
use crate::constants::{NameIdFormat, SAMLP_NS, SAML_NS};
use crate::crypt;
use crate::instant::{format_instant, parse_instant};
use crate::messages::NameId;
use crate::xml::dom::{escape_attr, escape_text, Document};

/// Options for building a LogoutRequest.
#[derive(Debug, Clone, Default)]
pub struct LogoutRequestOptions {
    /// Subject to log out; defaults to the SP entity when absent.
    pub name_id: Option<NameId>,
    /// Sessions to terminate at the IdP.
    pub session_indexes: Vec<String>,
}

/// An outbound `<samlp:LogoutRequest>`.
#[derive(Debug, Clone)]
pub struct LogoutRequest {
    id: String,
    xml: String,
}

impl LogoutRequest {
    /// Builds a LogoutRequest against the configured IdP SLO endpoint.
    ///
    /// # Errors
    ///
    /// `SingleLogoutNotSupported` when the IdP has no SLO URL;
    /// `EncryptionError` when NameID encryption is required but no IdP
    /// certificate is configured.
    pub fn new(
        settings: &Settings,
        clock: &dyn Clock,
        options: &LogoutRequestOptions,
    ) -> SpResult<Self> {
        let destination = settings.idp.slo_url.as_deref().ok_or_else(|| {
            SpError::new(
                ErrorKind::SingleLogoutNotSupported,
                "the IdP does not expose a Single Logout Service",
            )
        })?;

        let id = random::message_id();
        let issue_instant = format_instant(clock.now());

        let name_id = options.name_id.clone().unwrap_or_else(|| {
            NameId::new(&settings.sp.entity_id).with_format(NameIdFormat::Entity.uri())
        });

        let encrypt = settings.security.want_name_id_encrypted
            || settings.sp.name_id_format == NameIdFormat::Encrypted.uri();
        let name_id_xml = if encrypt {
            let cert_pem = settings.idp.certificates.first().ok_or_else(|| {
                SpError::new(
                    ErrorKind::EncryptionError,
                    "NameID encryption requires an IdP certificate",
                )
            })?;
            let certificate = Certificate::from_pem(cert_pem)
                .map_err(|e| SpError::new(ErrorKind::EncryptionError, e.to_string()))?;
            // The fragment re-declares the assertion namespace so it stays
            // well-formed on its own once decrypted.
            let plain = format!(
                r#"<saml:NameID xmlns:saml="{SAML_NS}"{}{}{}>{}</saml:NameID>"#,
                name_id
                    .format
                    .as_deref()
                    .map(|f| format!(r#" Format="{}""#, escape_attr(f)))
                    .unwrap_or_default(),
                name_id
                    .name_qualifier
                    .as_deref()
                    .map(|q| format!(r#" NameQualifier="{}""#, escape_attr(q)))
                    .unwrap_or_default(),
                name_id
                    .sp_name_qualifier
                    .as_deref()
                    .map(|q| format!(r#" SPNameQualifier="{}""#, escape_attr(q)))
                    .unwrap_or_default(),
                escape_text(&name_id.value),
            );
            crypt::encrypt_name_id(&plain, &certificate)?
        } else {
            name_id.to_xml()
        };

        let session_indexes: String = options
            .session_indexes
            .iter()
            .map(|s| format!("<samlp:SessionIndex>{}</samlp:SessionIndex>", escape_text(s)))
            .collect();

        let xml = format!(
            concat!(
                r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}">"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"{name_id}"#,
                r#"{session_indexes}"#,
                r#"</samlp:LogoutRequest>"#
            ),
            id = id,
            instant = issue_instant,
            destination = escape_attr(destination),
            issuer = escape_text(&settings.sp.entity_id),
            name_id = name_id_xml,
            session_indexes = session_indexes,
        );

        Ok(Self { id, xml })
    }

    /// The fresh request ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw XML.
    #[must_use]
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Encodes for the Redirect binding.
    pub fn redirect_payload(&self, deflate: bool) -> SpResult<String> {
        if deflate {
            HttpRedirectBinding::encode(&self.xml)
        } else {
            Ok(HttpRedirectBinding::encode_uncompressed(&self.xml))
        }
    }

    /// Parses an inbound LogoutRequest, decrypting the NameID when needed.
    pub fn parse(
        xml: &str,
        decryption_key: Option<&PrivateKey>,
        reject_deprecated: bool,
    ) -> SpResult<ParsedLogoutRequest> {
        let doc = Document::parse(xml)?;
        if !doc.root.is(SAMLP_NS, "LogoutRequest") {
            return Err(SpError::new(
                ErrorKind::InvalidXml,
                "document element is not samlp:LogoutRequest",
            ));
        }

        let name_id = if let Some(el) = doc.root.find_child(SAML_NS, "NameID") {
            Some(NameId::from_element(el))
        } else if let Some(encrypted) = doc.root.find_child(SAML_NS, "EncryptedID") {
            let key = decryption_key.ok_or_else(|| {
                SpError::new(
                    ErrorKind::DecryptionError,
                    "LogoutRequest NameID is encrypted and no SP private key is configured",
                )
            })?;
            let plain = crypt::decrypt_element(encrypted, key, reject_deprecated)?;
            if !plain.is(SAML_NS, "NameID") {
                return Err(SpError::new(
                    ErrorKind::DecryptionError,
                    "EncryptedID did not decrypt to a NameID",
                ));
            }
            Some(NameId::from_element(&plain))
        } else {
            None
        };

        let not_on_or_after = doc
            .root
            .attr("NotOnOrAfter")
            .map(parse_instant)
            .transpose()?;

        Ok(ParsedLogoutRequest {
            id: doc.root.attr("ID").map(str::to_string),
            issuer: doc
                .root
                .find_child(SAML_NS, "Issuer")
                .map(|i| i.text()),
            destination: doc.root.attr("Destination").map(str::to_string),
            name_id,
            session_indexes: doc
                .root
                .find_children(SAMLP_NS, "SessionIndex")
                .iter()
                .map(|s| s.text())
                .collect(),
            not_on_or_after,
        })
    }
}

/// An inbound LogoutRequest after decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedLogoutRequest {
    /// Message ID.
    pub id: Option<String>,
    /// Issuer entity ID.
    pub issuer: Option<String>,
    /// Destination attribute.
    pub destination: Option<String>,
    /// Subject being logged out.
    pub name_id: Option<NameId>,
    /// Session indexes to terminate.
    pub session_indexes: Vec<String>,
    /// Expiry of the request itself.
    pub not_on_or_after: Option<DateTime<Utc>>,
}
