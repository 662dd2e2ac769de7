//! LogoutResponse construction and inbound parsing.

use serde::{Deserialize, Serialize};
use sp_core::{Clock, ErrorKind, Settings, SpError, SpResult};
use sp_crypto::random;

use crate::bindings::HttpRedirectBinding;
use crate::constants::{status_codes, SAMLP_NS, SAML_NS};
use crate::instant::format_instant;
use crate::xml::dom::{escape_attr, escape_text, Document};

/// An outbound `<samlp:LogoutResponse>` answering an IdP-initiated logout.
#[derive(Debug, Clone)]
pub struct LogoutResponse {
    id: String,
    xml: String,
}

impl LogoutResponse {
    /// Builds a Success LogoutResponse addressed to the IdP SLO response
    /// endpoint.
    ///
    /// # Errors
    ///
    /// `SingleLogoutNotSupported` when the IdP has no SLO endpoint.
    pub fn new(
        settings: &Settings,
        clock: &dyn Clock,
        in_response_to: Option<&str>,
    ) -> SpResult<Self> {
        let destination = settings.idp.slo_response_url().ok_or_else(|| {
            SpError::new(
                ErrorKind::SingleLogoutNotSupported,
                "the IdP does not expose a Single Logout Service",
            )
        })?;

        let id = random::message_id();
        let in_response_to = in_response_to
            .map(|ir| format!(r#" InResponseTo="{}""#, escape_attr(ir)))
            .unwrap_or_default();

        let xml = format!(
            concat!(
                r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}"{irt}>"#,
                r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
                r#"<samlp:Status><samlp:StatusCode Value="{status}"/></samlp:Status>"#,
                r#"</samlp:LogoutResponse>"#
            ),
            id = id,
            instant = format_instant(clock.now()),
            destination = escape_attr(destination),
            irt = in_response_to,
            issuer = escape_text(&settings.sp.entity_id),
            status = status_codes::SUCCESS,
        );

        Ok(Self { id, xml })
    }

    /// The fresh response ID.
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

    /// Parses an inbound LogoutResponse.
    pub fn parse(xml: &str) -> SpResult<ParsedLogoutResponse> {
        let doc = Document::parse(xml)?;
        if !doc.root.is(SAMLP_NS, "LogoutResponse") {
            return Err(SpError::new(
                ErrorKind::InvalidXml,
                "document element is not samlp:LogoutResponse",
            ));
        }

        let status = doc.root.find_child(SAMLP_NS, "Status");
        let status_code = status
            .and_then(|s| s.find_child(SAMLP_NS, "StatusCode"))
            .and_then(|c| c.attr("Value"))
            .map(str::to_string);
        let sub_status_code = status
            .and_then(|s| s.find_child(SAMLP_NS, "StatusCode"))
            .and_then(|c| c.find_child(SAMLP_NS, "StatusCode"))
            .and_then(|c| c.attr("Value"))
            .map(str::to_string);
        let status_message = status
            .and_then(|s| s.find_child(SAMLP_NS, "StatusMessage"))
            .map(|m| m.text());

        Ok(ParsedLogoutResponse {
            id: doc.root.attr("ID").map(str::to_string),
            issuer: doc.root.find_child(SAML_NS, "Issuer").map(|i| i.text()),
            in_response_to: doc.root.attr("InResponseTo").map(str::to_string),
            destination: doc.root.attr("Destination").map(str::to_string),
            status_code,
            sub_status_code,
            status_message,
        })
    }
}

/// An inbound LogoutResponse after decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedLogoutResponse {
    /// Message ID.
    pub id: Option<String>,
    /// Issuer entity ID.
    pub issuer: Option<String>,
    /// The request this response answers.
    pub in_response_to: Option<String>,
    /// Destination attribute.
    pub destination: Option<String>,
    /// Top-level status code.
    pub status_code: Option<String>,
    /// Second-level status code.
    pub sub_status_code: Option<String>,
    /// Status message.
    pub status_message: Option<String>,
}

impl ParsedLogoutResponse {
    /// Returns true when the status is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.as_deref() == Some(status_codes::SUCCESS)
    }
}
