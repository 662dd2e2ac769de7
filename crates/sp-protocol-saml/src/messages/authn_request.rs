//! AuthnRequest construction.

use sp_core::{Clock, Settings, SpResult};
use sp_crypto::random;

use crate::bindings::HttpRedirectBinding;
use crate::constants::{CM_BEARER, NameIdFormat};
use crate::instant::format_instant;
use crate::xml::dom::{escape_attr, escape_text};

/// Options for building an AuthnRequest.
#[derive(Debug, Clone, Default)]
pub struct AuthnRequestOptions {
    /// Ask the IdP to re-authenticate the user even with a live session.
    pub force_authn: bool,
    /// Forbid the IdP from interacting with the user.
    pub is_passive: bool,
    /// Emit a `<samlp:NameIDPolicy>` with the configured format.
    pub set_name_id_policy: bool,
    /// Request authentication for a specific subject.
    pub name_id_value_req: Option<String>,
}

/// An outbound `<samlp:AuthnRequest>`.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    id: String,
    xml: String,
}

impl AuthnRequest {
    /// Builds an AuthnRequest against the configured IdP SSO endpoint.
    pub fn new(settings: &Settings, clock: &dyn Clock, options: &AuthnRequestOptions) -> Self {
        let id = random::message_id();
        let issue_instant = format_instant(clock.now());

        let mut flags = String::new();
        if options.force_authn {
            flags.push_str(r#" ForceAuthn="true""#);
        }
        if options.is_passive {
            flags.push_str(r#" IsPassive="true""#);
        }

        let mut body = format!(
            "<saml:Issuer>{}</saml:Issuer>",
            escape_text(&settings.sp.entity_id)
        );

        if let Some(subject) = &options.name_id_value_req {
            let format = if settings.sp.name_id_format == NameIdFormat::Encrypted.uri() {
                NameIdFormat::Unspecified.uri()
            } else {
                settings.sp.name_id_format.as_str()
            };
            body.push_str(&format!(
                concat!(
                    r#"<saml:Subject>"#,
                    r#"<saml:NameID Format="{}">{}</saml:NameID>"#,
                    r#"<saml:SubjectConfirmation Method="{}"/>"#,
                    r#"</saml:Subject>"#
                ),
                escape_attr(format),
                escape_text(subject),
                CM_BEARER,
            ));
        }

        if options.set_name_id_policy {
            body.push_str(&format!(
                r#"<samlp:NameIDPolicy Format="{}" AllowCreate="true"/>"#,
                escape_attr(&settings.sp.name_id_format)
            ));
        }

        let contexts = &settings.security.requested_authn_context;
        if !contexts.is_empty() {
            let refs: String = contexts
                .iter()
                .map(|c| format!("<saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef>", escape_text(c)))
                .collect();
            body.push_str(&format!(
                r#"<samlp:RequestedAuthnContext Comparison="{}">{refs}</samlp:RequestedAuthnContext>"#,
                escape_attr(&settings.security.requested_authn_context_comparison)
            ));
        }

        let xml = format!(
            concat!(
                r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" "#,
                r#"ProtocolBinding="{binding}" AssertionConsumerServiceURL="{acs}"{flags}>"#,
                r#"{body}"#,
                r#"</samlp:AuthnRequest>"#
            ),
            id = id,
            instant = issue_instant,
            destination = escape_attr(&settings.idp.sso_url),
            binding = escape_attr(&settings.sp.acs_binding),
            acs = escape_attr(&settings.sp.acs_url),
            flags = flags,
            body = body,
        );

        Self { id, xml }
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
}
