//! End-to-end SSO: AuthnRequest construction and Response processing.

mod common;

use base64::Engine;
use common::*;
use sp_auth::{HttpParams, LoginOptions};
use sp_core::ErrorKind;
use sp_protocol_saml::bindings::{HttpPostBinding, HttpRedirectBinding};
use sp_protocol_saml::sign::query::{signed_query_from_raw, verify_query};

fn post_params(response_xml: &str) -> HttpParams {
    HttpParams::from_pairs([("SAMLResponse", HttpPostBinding::encode(response_xml))])
}

#[test]
fn happy_post_sso() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let response = forge_response(&idp, &ResponseSpec::default());
    auth.process_response(&post_params(&response), None).unwrap();

    assert!(auth.is_authenticated());
    assert!(auth.errors().is_empty());
    assert_eq!(auth.session().name_id.as_deref(), Some("alice@example"));
    assert_eq!(auth.attribute("uid").unwrap(), ["alice"]);
    assert_eq!(auth.session().session_index.as_deref(), Some("_s1"));
    assert_eq!(auth.session().last_message_id.as_deref(), Some("_resp001"));
    assert_eq!(auth.session().last_assertion_id.as_deref(), Some("_asrt001"));
    assert_eq!(
        auth.session().last_assertion_not_on_or_after,
        Some("2024-06-01T12:05:00Z".parse().unwrap())
    );
    assert!(auth.last_response_xml().is_some());
}

#[test]
fn tampered_assertion_is_rejected() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let response = forge_response(&idp, &ResponseSpec::default()).replace(">alice<", ">mallory<");
    auth.process_response(&post_params(&response), None).unwrap();

    assert!(!auth.is_authenticated());
    assert!(auth.errors().contains(&ErrorKind::InvalidSignature));
    assert!(auth.session().name_id.is_none());
}

#[test]
fn expired_assertion_is_rejected() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let spec = ResponseSpec {
        not_on_or_after: "2024-06-01T11:59:59Z".to_string(),
        ..Default::default()
    };
    let response = forge_response(&idp, &spec);
    auth.process_response(&post_params(&response), None).unwrap();

    assert!(!auth.is_authenticated());
    assert!(auth.errors().contains(&ErrorKind::AssertionExpired));
}

#[test]
fn authentication_is_atomic_across_calls() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    // Invariant: authenticated exactly when the error list is empty.
    let good = forge_response(&idp, &ResponseSpec::default());
    auth.process_response(&post_params(&good), None).unwrap();
    assert_eq!(auth.is_authenticated(), auth.errors().is_empty());
    assert!(auth.is_authenticated());

    let bad = good.replace(">alice<", ">eve<");
    auth.process_response(&post_params(&bad), None).unwrap();
    assert_eq!(auth.is_authenticated(), auth.errors().is_empty());
    assert!(!auth.is_authenticated());
    assert!(auth.last_error().is_some());
    assert!(auth.last_error_source().is_some());
}

#[test]
fn in_response_to_must_match_the_outstanding_request() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let spec = ResponseSpec {
        in_response_to: Some("_req42".to_string()),
        ..Default::default()
    };
    let response = forge_response(&idp, &spec);

    auth.process_response(&post_params(&response), Some("_req42"))
        .unwrap();
    assert!(auth.is_authenticated());

    auth.process_response(&post_params(&response), Some("_other"))
        .unwrap();
    assert!(!auth.is_authenticated());
    assert!(auth.errors().contains(&ErrorKind::InvalidInResponseTo));
}

#[test]
fn missing_saml_response_parameter_raises() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let err = auth
        .process_response(&HttpParams::new(), None)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SamlResponseNotFound);
}

#[test]
fn login_builds_a_signed_redirect() {
    let idp = generate_party("idp");
    let sp = generate_party("sp");
    let mut settings = base_settings(&idp);
    settings.sp.private_key = Some(sp.key_pem.clone());
    settings.sp.certificate = Some(sp.cert_pem.clone());
    settings.security.authn_requests_signed = true;
    let mut auth = auth_at_fixed_time(settings);

    let redirect = auth
        .login(&LoginOptions {
            return_to: Some("https://sp.example/app".to_string()),
            force_authn: true,
            ..Default::default()
        })
        .unwrap();

    let parsed = url::Url::parse(&redirect).unwrap();
    assert_eq!(parsed.host_str(), Some("idp.example"));
    assert_eq!(parsed.path(), "/sso");

    let params: std::collections::HashMap<String, String> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert_eq!(params.get("RelayState").unwrap(), "https://sp.example/app");
    assert!(params.contains_key("SigAlg"));
    assert!(params.contains_key("Signature"));

    // The SAMLRequest inflates back to the request we recorded.
    let xml = HttpRedirectBinding::decode(params.get("SAMLRequest").unwrap()).unwrap();
    assert!(xml.contains(r#"ForceAuthn="true""#));
    assert!(xml.contains(&format!(r#"ID="{}""#, auth.last_request_id().unwrap())));
    assert_eq!(auth.last_request_xml(), Some(xml.as_str()));

    // And the query signature verifies under the SP certificate.
    let raw_query = parsed.query().unwrap();
    let signed_query = signed_query_from_raw(raw_query).unwrap();
    verify_query(
        &signed_query,
        params.get("Signature").unwrap(),
        params.get("SigAlg").unwrap(),
        std::slice::from_ref(&sp.cert),
        false,
    )
    .unwrap();
}

#[test]
fn login_without_signing_omits_signature_params() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let redirect = auth.login(&LoginOptions::default()).unwrap();
    let parsed = url::Url::parse(&redirect).unwrap();
    let names: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
    assert!(names.contains(&"SAMLRequest".to_string()));
    assert!(!names.contains(&"SigAlg".to_string()));
    assert!(!names.contains(&"RelayState".to_string()));
}

#[test]
fn redirect_payload_is_raw_deflate() {
    let idp = generate_party("idp");
    let mut auth = auth_at_fixed_time(base_settings(&idp));

    let redirect = auth.login(&LoginOptions::default()).unwrap();
    let parsed = url::Url::parse(&redirect).unwrap();
    let payload = parsed
        .query_pairs()
        .find(|(k, _)| k == "SAMLRequest")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap();
    // No zlib header on the Redirect binding.
    assert_ne!(bytes[0], 0x78);
}
