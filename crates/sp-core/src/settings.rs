//! Service-provider settings.
//!
//! A [`Settings`] value is assembled by the caller (config file, metadata
//! import) and frozen before the first protocol operation. Apart from the
//! explicit [`Settings::set_strict`] toggle nothing mutates it afterwards,
//! which is what makes it safe to share read-only across requests.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sp_crypto::{Certificate, DigestAlgorithm, PrivateKey, SignatureAlgorithm};

use crate::error::{ErrorKind, SpError, SpResult};

/// HTTP-POST binding URI.
pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// HTTP-Redirect binding URI.
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Unspecified NameID format URI.
pub const NAMEID_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Service-provider descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpSettings {
    /// SP entity ID (the audience of received assertions).
    pub entity_id: String,

    /// Assertion Consumer Service URL.
    pub acs_url: String,

    /// ACS binding URI.
    pub acs_binding: String,

    /// Single Logout Service URL, when SLO is supported.
    pub slo_url: Option<String>,

    /// SLO binding URI.
    pub slo_binding: String,

    /// Requested NameID format.
    pub name_id_format: String,

    /// PEM-encoded private key for signing and decryption.
    pub private_key: Option<String>,

    /// PEM-encoded SP certificate.
    pub certificate: Option<String>,

    /// Next certificate during rotation, pre-published to relying parties.
    pub new_certificate: Option<String>,
}

impl SpSettings {
    /// Creates an SP descriptor with the usual binding defaults.
    pub fn new(entity_id: impl Into<String>, acs_url: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            acs_url: acs_url.into(),
            acs_binding: BINDING_HTTP_POST.to_string(),
            slo_url: None,
            slo_binding: BINDING_HTTP_REDIRECT.to_string(),
            name_id_format: NAMEID_UNSPECIFIED.to_string(),
            private_key: None,
            certificate: None,
            new_certificate: None,
        }
    }
}

/// Identity-provider descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpSettings {
    /// IdP entity ID (the expected issuer of received messages).
    pub entity_id: String,

    /// Single Sign-On Service URL.
    pub sso_url: String,

    /// SSO binding URI.
    pub sso_binding: String,

    /// Single Logout Service URL.
    pub slo_url: Option<String>,

    /// URL for SLO responses, when distinct from `slo_url`.
    pub slo_response_url: Option<String>,

    /// PEM-encoded signing certificates, tried in order.
    pub certificates: Vec<String>,

    /// Certificate fingerprints, used when no certificate is configured.
    pub cert_fingerprints: Vec<String>,

    /// Digest algorithm the fingerprints were computed with.
    pub cert_fingerprint_algorithm: DigestAlgorithm,
}

impl IdpSettings {
    /// Creates an IdP descriptor with the usual binding defaults.
    pub fn new(entity_id: impl Into<String>, sso_url: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            sso_url: sso_url.into(),
            sso_binding: BINDING_HTTP_REDIRECT.to_string(),
            slo_url: None,
            slo_response_url: None,
            certificates: Vec::new(),
            cert_fingerprints: Vec::new(),
            cert_fingerprint_algorithm: DigestAlgorithm::Sha1,
        }
    }

    /// The URL SLO responses are sent to (`slo_response_url`, falling back
    /// to `slo_url`).
    #[must_use]
    pub fn slo_response_url(&self) -> Option<&str> {
        self.slo_response_url
            .as_deref()
            .or(self.slo_url.as_deref())
    }
}

/// Security toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Sign outbound AuthnRequests.
    pub authn_requests_signed: bool,
    /// Sign outbound LogoutRequests.
    pub logout_request_signed: bool,
    /// Sign outbound LogoutResponses.
    pub logout_response_signed: bool,
    /// Require inbound messages (Response, logout messages) to be signed.
    pub want_messages_signed: bool,
    /// Require inbound assertions to be signed.
    pub want_assertions_signed: bool,
    /// Require inbound assertions to arrive encrypted.
    pub want_assertions_encrypted: bool,
    /// Encrypt the NameID on outbound LogoutRequests, and require inbound
    /// NameIDs to be encrypted.
    pub want_name_id_encrypted: bool,
    /// Sign published metadata (carried for completeness; publication is
    /// outside this toolkit).
    pub sign_metadata: bool,
    /// Run the structural schema pass on inbound messages.
    pub want_xml_validation: bool,
    /// Requested authentication context class refs for AuthnRequests.
    pub requested_authn_context: Vec<String>,
    /// Comparison attribute for the requested context (`exact`, `minimum`,
    /// `maximum`, `better`).
    pub requested_authn_context_comparison: String,
    /// Signature algorithm for outbound signing.
    pub signature_algorithm: SignatureAlgorithm,
    /// Digest algorithm for outbound signing.
    pub digest_algorithm: DigestAlgorithm,
    /// Percent-encode with lowercase hex when building signed query strings
    /// (ADFS interoperability).
    pub lowercase_urlencoding: bool,
    /// Refuse SHA-1 signatures/digests and RSA-1.5 key transport on inbound
    /// messages.
    pub reject_deprecated_algorithm: bool,
    /// Reject unsolicited responses that carry `InResponseTo`.
    pub reject_unsolicited_responses_with_in_response_to: bool,
    /// Clock skew tolerated by temporal checks, in seconds.
    pub allowed_clock_drift_secs: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            authn_requests_signed: false,
            logout_request_signed: false,
            logout_response_signed: false,
            want_messages_signed: false,
            want_assertions_signed: false,
            want_assertions_encrypted: false,
            want_name_id_encrypted: false,
            sign_metadata: false,
            want_xml_validation: true,
            requested_authn_context: Vec::new(),
            requested_authn_context_comparison: "exact".to_string(),
            signature_algorithm: SignatureAlgorithm::RsaSha256,
            digest_algorithm: DigestAlgorithm::Sha256,
            lowercase_urlencoding: false,
            reject_deprecated_algorithm: false,
            reject_unsolicited_responses_with_in_response_to: false,
            allowed_clock_drift_secs: 0,
        }
    }
}

/// Compression preferences for the Redirect binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// DEFLATE outbound requests.
    pub requests: bool,
    /// DEFLATE outbound responses.
    pub responses: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            requests: true,
            responses: true,
        }
    }
}

/// A technical or support contact published in metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactPerson {
    /// Contact type (`technical`, `support`, ...).
    pub contact_type: String,
    /// Given name.
    pub given_name: String,
    /// Email address.
    pub email: String,
}

/// Organization information published in metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Organization name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Organization URL.
    pub url: String,
}

/// The frozen configuration consumed by the protocol and orchestration
/// layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Strict mode: abort validation on the first failure and enforce every
    /// structural rule. Production deployments run strict.
    pub strict: bool,

    /// Service-provider descriptor.
    pub sp: SpSettings,

    /// Identity-provider descriptor.
    pub idp: IdpSettings,

    /// Security toggles.
    pub security: SecuritySettings,

    /// Redirect-binding compression preferences.
    pub compression: CompressionSettings,

    /// Contacts for metadata.
    pub contacts: Vec<ContactPerson>,

    /// Organization for metadata.
    pub organization: Option<Organization>,

    /// Directory holding the SAML XSD files for the schema pass.
    pub schemas_path: Option<PathBuf>,
}

impl Settings {
    /// Assembles settings with defaults for everything beyond the two
    /// descriptors, then validates them.
    ///
    /// # Errors
    ///
    /// Returns `SettingsInvalid` listing every problem found.
    pub fn new(sp: SpSettings, idp: IdpSettings) -> SpResult<Self> {
        let settings = Self {
            strict: true,
            sp,
            idp,
            security: SecuritySettings::default(),
            compression: CompressionSettings::default(),
            contacts: Vec::new(),
            organization: None,
            schemas_path: None,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Toggles strict mode. This is the only post-construction mutation the
    /// settings object supports.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Validates the assembled settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsInvalid` listing every problem found.
    pub fn validate(&self) -> SpResult<()> {
        let mut problems = Vec::new();

        if self.sp.entity_id.is_empty() {
            problems.push("sp.entity_id is empty".to_string());
        }
        if self.sp.acs_url.is_empty() {
            problems.push("sp.acs_url is empty".to_string());
        }
        if self.idp.entity_id.is_empty() {
            problems.push("idp.entity_id is empty".to_string());
        }
        if self.idp.sso_url.is_empty() {
            problems.push("idp.sso_url is empty".to_string());
        }
        if self.idp.certificates.is_empty() && self.idp.cert_fingerprints.is_empty() {
            problems.push("idp has neither certificates nor fingerprints".to_string());
        }

        for (i, pem) in self.idp.certificates.iter().enumerate() {
            if let Err(e) = Certificate::from_pem(pem) {
                problems.push(format!("idp.certificates[{i}]: {e}"));
            }
        }
        for cert in [&self.sp.certificate, &self.sp.new_certificate]
            .into_iter()
            .flatten()
        {
            if let Err(e) = Certificate::from_pem(cert) {
                problems.push(format!("sp certificate: {e}"));
            }
        }

        let signing_requested = self.security.authn_requests_signed
            || self.security.logout_request_signed
            || self.security.logout_response_signed;
        let decryption_expected =
            self.security.want_assertions_encrypted || self.security.want_name_id_encrypted;
        if (signing_requested || decryption_expected) && self.sp.private_key.is_none() {
            problems.push(
                "sp.private_key is required by the configured signing/encryption toggles"
                    .to_string(),
            );
        }
        if let Some(pem) = &self.sp.private_key {
            if let Err(e) = PrivateKey::from_pem(pem) {
                problems.push(format!("sp.private_key: {e}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SpError::new(ErrorKind::SettingsInvalid, problems.join("; ")))
        }
    }

    /// Loads the SP private key.
    ///
    /// # Errors
    ///
    /// Returns `PrivateKeyNotFound` when no key is configured.
    pub fn sp_private_key(&self) -> SpResult<PrivateKey> {
        let pem = self.sp.private_key.as_deref().ok_or_else(|| {
            SpError::new(ErrorKind::PrivateKeyNotFound, "no SP private key configured")
        })?;
        PrivateKey::from_pem(pem)
            .map_err(|e| SpError::new(ErrorKind::PrivateKeyNotFound, e.to_string()))
    }

    /// Parses the configured IdP certificates.
    ///
    /// # Errors
    ///
    /// Returns `SettingsInvalid` when a configured certificate is malformed.
    pub fn idp_certificates(&self) -> SpResult<Vec<Certificate>> {
        self.idp
            .certificates
            .iter()
            .map(|pem| {
                Certificate::from_pem(pem)
                    .map_err(|e| SpError::new(ErrorKind::SettingsInvalid, e.to_string()))
            })
            .collect()
    }

    /// Parses the SP certificate, when one is configured.
    pub fn sp_certificate(&self) -> SpResult<Option<Certificate>> {
        self.sp
            .certificate
            .as_deref()
            .map(|pem| {
                Certificate::from_pem(pem)
                    .map_err(|e| SpError::new(ErrorKind::SettingsInvalid, e.to_string()))
            })
            .transpose()
    }
}
