#![allow(dead_code)]

//! Shared fixtures: deterministic clock, generated key material, and an
//! IdP stand-in that forges signed messages the way a real IdP would.

use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use sp_auth::Auth;
use sp_core::{FixedClock, IdpSettings, Settings, SpSettings};
use sp_crypto::{Certificate, DigestAlgorithm, PrivateKey, SignatureAlgorithm};
use sp_protocol_saml::sign::xmldsig::sign_xml;

pub const NOW: &str = "2024-06-01T12:00:00Z";
pub const SP_ENTITY: &str = "https://sp.example/meta";
pub const SP_ACS: &str = "https://sp.example/acs";
pub const SP_SLO: &str = "https://sp.example/slo";
pub const IDP_ENTITY: &str = "https://idp.example/meta";
pub const IDP_SSO: &str = "https://idp.example/sso";
pub const IDP_SLO: &str = "https://idp.example/slo";

pub struct Party {
    pub key: PrivateKey,
    pub key_pem: String,
    pub cert: Certificate,
    pub cert_pem: String,
}

pub fn generate_party(cn: &str) -> Party {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();
    let key_pem = String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();

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

    Party {
        key: PrivateKey::from_pem(&key_pem).unwrap(),
        key_pem,
        cert: Certificate::from_der(cert.to_der().unwrap()).unwrap(),
        cert_pem,
    }
}

pub fn base_settings(idp: &Party) -> Settings {
    let mut sp = SpSettings::new(SP_ENTITY, SP_ACS);
    sp.slo_url = Some(SP_SLO.to_string());
    let mut idp_settings = IdpSettings::new(IDP_ENTITY, IDP_SSO);
    idp_settings.slo_url = Some(IDP_SLO.to_string());
    idp_settings.certificates = vec![idp.cert_pem.clone()];
    Settings::new(sp, idp_settings).unwrap()
}

pub fn auth_at_fixed_time(settings: Settings) -> Auth {
    Auth::with_clock(settings, Box::new(FixedClock(NOW.parse().unwrap()))).unwrap()
}

/// Knobs for the forged response; defaults match the happy path.
pub struct ResponseSpec {
    pub in_response_to: Option<String>,
    pub not_on_or_after: String,
    pub scd_not_on_or_after: String,
    pub name_id: String,
    pub uid: String,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            in_response_to: None,
            not_on_or_after: "2024-06-01T12:05:00Z".to_string(),
            scd_not_on_or_after: "2024-06-01T12:05:00Z".to_string(),
            name_id: "alice@example".to_string(),
            uid: "alice".to_string(),
        }
    }
}

/// Builds the response XML an IdP would send and signs its assertion.
pub fn forge_response(idp: &Party, spec: &ResponseSpec) -> String {
    let irt = spec
        .in_response_to
        .as_deref()
        .map(|i| format!(r#" InResponseTo="{i}""#))
        .unwrap_or_default();
    let scd_irt = spec
        .in_response_to
        .as_deref()
        .map(|i| format!(r#" InResponseTo="{i}""#))
        .unwrap_or_default();

    let xml = format!(
        concat!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
            r#"ID="_resp001" Version="2.0" IssueInstant="{now}" Destination="{acs}"{irt}>"#,
            r#"<saml:Issuer>{idp}</saml:Issuer>"#,
            r#"<samlp:Status><samlp:StatusCode "#,
            r#"Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>"#,
            r#"<saml:Assertion ID="_asrt001" Version="2.0" IssueInstant="{now}">"#,
            r#"<saml:Issuer>{idp}</saml:Issuer>"#,
            r#"<saml:Subject>"#,
            r#"<saml:NameID>{name_id}</saml:NameID>"#,
            r#"<saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer">"#,
            r#"<saml:SubjectConfirmationData Recipient="{acs}" NotOnOrAfter="{scd_noa}"{scd_irt}/>"#,
            r#"</saml:SubjectConfirmation>"#,
            r#"</saml:Subject>"#,
            r#"<saml:Conditions NotBefore="2024-06-01T11:55:00Z" NotOnOrAfter="{noa}">"#,
            r#"<saml:AudienceRestriction><saml:Audience>{sp}</saml:Audience>"#,
            r#"</saml:AudienceRestriction></saml:Conditions>"#,
            r#"<saml:AuthnStatement AuthnInstant="{now}" SessionIndex="_s1">"#,
            r#"<saml:AuthnContext><saml:AuthnContextClassRef>"#,
            r#"urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport"#,
            r#"</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#,
            r#"<saml:AttributeStatement>"#,
            r#"<saml:Attribute Name="uid">"#,
            r#"<saml:AttributeValue>{uid}</saml:AttributeValue>"#,
            r#"</saml:Attribute>"#,
            r#"</saml:AttributeStatement>"#,
            r#"</saml:Assertion>"#,
            r#"</samlp:Response>"#
        ),
        now = NOW,
        acs = SP_ACS,
        irt = irt,
        idp = IDP_ENTITY,
        name_id = spec.name_id,
        scd_noa = spec.scd_not_on_or_after,
        scd_irt = scd_irt,
        noa = spec.not_on_or_after,
        sp = SP_ENTITY,
        uid = spec.uid,
    );

    sign_xml(
        &xml,
        "_asrt001",
        &idp.key,
        Some(&idp.cert),
        SignatureAlgorithm::RsaSha256,
        DigestAlgorithm::Sha256,
    )
    .unwrap()
}

/// Builds the LogoutRequest XML an IdP would send for IdP-initiated SLO.
pub fn forge_logout_request(issuer: &str) -> String {
    format!(
        concat!(
            r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
            r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_idp_lr_1" Version="2.0" "#,
            r#"IssueInstant="{now}" Destination="{slo}" NotOnOrAfter="2024-06-01T12:10:00Z">"#,
            r#"<saml:Issuer>{issuer}</saml:Issuer>"#,
            r#"<saml:NameID>alice@example</saml:NameID>"#,
            r#"<samlp:SessionIndex>_s1</samlp:SessionIndex>"#,
            r#"</samlp:LogoutRequest>"#
        ),
        now = NOW,
        slo = SP_SLO,
        issuer = issuer,
    )
}
