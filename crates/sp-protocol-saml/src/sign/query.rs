//! Detached query-string signatures for the HTTP-Redirect binding.
//!
//! The signed octet string is exactly
//! `{TYPE}={E(payload)}&RelayState={E(relayState)}&SigAlg={E(sigAlg)}`,
//! with the RelayState clause omitted when absent. The concatenation order
//! is contractual. `E` is percent-encoding, optionally with lowercase hex
//! digits for peers (notably ADFS) that encode that way.

use base64::Engine;
use sp_core::{ErrorKind, SpError, SpResult};
use sp_crypto::{rsa, Certificate, PrivateKey, SignatureAlgorithm};

use crate::bindings::SamlMessageType;

/// Percent-encodes a query value.
#[must_use]
pub fn percent_encode(value: &str, lowercase: bool) -> String {
    let encoded = urlencoding::encode(value).into_owned();
    if lowercase {
        lowercase_hex_escapes(&encoded)
    } else {
        encoded
    }
}

fn lowercase_hex_escapes(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut pending = 0u8;
    for c in encoded.chars() {
        if pending > 0 {
            out.extend(c.to_lowercase());
            pending -= 1;
        } else if c == '%' {
            out.push(c);
            pending = 2;
        } else {
            out.push(c);
        }
    }
    out
}

/// Builds the octet string to sign or verify from decoded parameter values.
#[must_use]
pub fn build_signed_query(
    kind: SamlMessageType,
    payload: &str,
    relay_state: Option<&str>,
    sig_alg: &str,
    lowercase: bool,
) -> String {
    let mut query = format!(
        "{}={}",
        kind.form_param(),
        percent_encode(payload, lowercase)
    );
    if let Some(rs) = relay_state {
        query.push_str("&RelayState=");
        query.push_str(&percent_encode(rs, lowercase));
    }
    query.push_str("&SigAlg=");
    query.push_str(&percent_encode(sig_alg, lowercase));
    query
}

/// Reconstructs the signed octet string from the raw query string exactly
/// as the sender encoded it.
///
/// Parameter values are taken byte-for-byte from the wire; only the
/// contractual ordering is imposed.
pub fn signed_query_from_raw(raw_query: &str) -> SpResult<String> {
    let raw = raw_query.strip_prefix('?').unwrap_or(raw_query);

    let mut payload = None;
    let mut relay_state = None;
    let mut sig_alg = None;

    for part in raw.split('&') {
        let (name, _) = part.split_once('=').unwrap_or((part, ""));
        match name {
            "SAMLRequest" | "SAMLResponse" => payload = Some(part),
            "RelayState" => relay_state = Some(part),
            "SigAlg" => sig_alg = Some(part),
            _ => {}
        }
    }

    let payload = payload.ok_or_else(|| {
        SpError::new(
            ErrorKind::InvalidSignature,
            "raw query has no SAMLRequest or SAMLResponse",
        )
    })?;
    let sig_alg = sig_alg
        .ok_or_else(|| SpError::new(ErrorKind::InvalidSignature, "raw query has no SigAlg"))?;

    let mut query = payload.to_string();
    if let Some(rs) = relay_state {
        query.push('&');
        query.push_str(rs);
    }
    query.push('&');
    query.push_str(sig_alg);
    Ok(query)
}

/// Signs a Redirect-binding message, returning the signed query string and
/// the base64 signature.
pub fn sign_query(
    key: &PrivateKey,
    kind: SamlMessageType,
    payload: &str,
    relay_state: Option<&str>,
    algorithm: SignatureAlgorithm,
    lowercase: bool,
) -> SpResult<(String, String)> {
    let query = build_signed_query(kind, payload, relay_state, algorithm.uri(), lowercase);
    let sig = rsa::sign(key, query.as_bytes(), algorithm)
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(sig);
    Ok((query, sig_b64))
}

/// Verifies a Redirect-binding signature against the IdP certificates.
pub fn verify_query(
    signed_query: &str,
    signature_b64: &str,
    sig_alg_uri: &str,
    certificates: &[Certificate],
    reject_deprecated: bool,
) -> SpResult<()> {
    let algorithm = SignatureAlgorithm::from_uri(sig_alg_uri).ok_or_else(|| {
        SpError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            format!("unknown SigAlg {sig_alg_uri:?}"),
        )
    })?;
    if reject_deprecated && algorithm.is_deprecated() {
        return Err(SpError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            format!("{} is deprecated", algorithm.uri()),
        ));
    }

    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, format!("signature base64: {e}")))?;

    for cert in certificates {
        let public_key = cert
            .public_key_pkcs1()
            .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;
        match rsa::verify(&public_key, signed_query.as_bytes(), &signature, algorithm) {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(error = %e, "redirect signature check errored for one certificate");
            }
        }
    }

    Err(SpError::new(
        ErrorKind::InvalidSignature,
        "no configured IdP certificate validated the query signature",
    ))
}
