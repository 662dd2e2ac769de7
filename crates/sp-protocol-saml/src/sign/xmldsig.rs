//! Enveloped XML-DSig signing and verification.
//!
//! Verification is deliberately narrow: one `Reference`, whose URI must
//! name the element the caller is about to trust; only the
//! enveloped-signature and exclusive-C14N transforms; IDs must be unique in
//! the document. Everything outside that envelope is rejected, which is
//! what closes off the signature-wrapping tricks.

use base64::Engine;
use sp_core::{ErrorKind, SpError, SpResult};
use sp_crypto::{
    hash, keys::normalize_fingerprint, rsa, Certificate, DigestAlgorithm, PrivateKey,
    SignatureAlgorithm,
};

use crate::constants::{DS_NS, EXC_C14N, EXC_C14N_WITH_COMMENTS, SAML_NS, TRANSFORM_ENVELOPED};
use crate::xml::c14n::exclusive_c14n;
use crate::xml::dom::{Document, Element, XmlNode};

/// Trust anchors for signature verification: configured certificates, or
/// fingerprints pinned against the certificate embedded in the signature.
#[derive(Debug, Clone, Copy)]
pub struct TrustAnchors<'a> {
    /// IdP certificates, tried in order.
    pub certificates: &'a [Certificate],
    /// Fingerprints of acceptable certificates.
    pub fingerprints: &'a [String],
    /// Digest the fingerprints were computed with.
    pub fingerprint_algorithm: DigestAlgorithm,
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedSignature {
    /// Signature algorithm that validated.
    pub algorithm: SignatureAlgorithm,
    /// Digest algorithm of the reference.
    pub digest_algorithm: DigestAlgorithm,
}

/// Signs the element carrying `reference_id` with an enveloped signature.
///
/// The `<ds:Signature>` is inserted after the element's `<saml:Issuer>`
/// child when one exists, otherwise as the first child. Returns the
/// serialized document.
pub fn sign_xml(
    xml: &str,
    reference_id: &str,
    key: &PrivateKey,
    certificate: Option<&Certificate>,
    algorithm: SignatureAlgorithm,
    digest_algorithm: DigestAlgorithm,
) -> SpResult<String> {
    let mut doc = Document::parse(xml)?;

    let digest_b64 = {
        let target = doc.find_by_id(reference_id).ok_or_else(|| {
            SpError::new(
                ErrorKind::InvalidXml,
                format!("no element carries ID {reference_id:?}"),
            )
        })?;
        let mut detached = target.clone();
        detached.remove_children(DS_NS, "Signature");
        let canonical = exclusive_c14n(&detached, &doc, false);
        let digest = hash::hash(digest_algorithm, canonical.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(digest)
    };

    let signed_info = build_signed_info(reference_id, &digest_b64, algorithm, digest_algorithm);

    let signed_info_doc = Document::parse(&signed_info)?;
    let canonical_signed_info = exclusive_c14n(&signed_info_doc.root, &signed_info_doc, false);

    let signature = rsa::sign(key, canonical_signed_info.as_bytes(), algorithm)
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature);

    let signature_xml = build_signature_element(&signed_info, &signature_b64, certificate);
    let signature_element = Document::parse(&signature_xml)?.root;

    let target = find_by_id_mut(&mut doc.root, reference_id)
        .ok_or_else(|| SpError::new(ErrorKind::InvalidXml, "signed element vanished"))?;
    let position = target
        .children
        .iter()
        .position(|n| matches!(n, XmlNode::Element(e) if e.is(SAML_NS, "Issuer")))
        .map_or(0, |i| i + 1);
    target
        .children
        .insert(position, XmlNode::Element(signature_element));

    Ok(doc.to_xml())
}

/// Verifies the enveloped signature that is a direct child of `target`.
///
/// `target` must be an element of `doc` (the top-level Response or the
/// consumed Assertion); the reference URI must name it and nothing else.
pub fn verify_enveloped(
    doc: &Document,
    target: &Element,
    anchors: &TrustAnchors<'_>,
    reject_deprecated: bool,
) -> SpResult<VerifiedSignature> {
    let signatures = target.find_children(DS_NS, "Signature");
    let signature = match signatures.as_slice() {
        [] => {
            return Err(SpError::new(
                ErrorKind::NoSignedElement,
                format!("{} carries no signature", target.local),
            ))
        }
        [one] => *one,
        _ => {
            return Err(SpError::new(
                ErrorKind::DuplicatedSignedElement,
                format!("{} carries more than one signature", target.local),
            ))
        }
    };

    let signed_info = signature
        .find_child(DS_NS, "SignedInfo")
        .ok_or_else(|| SpError::new(ErrorKind::InvalidSignature, "signature has no SignedInfo"))?;

    // Exactly one reference, and it must point at the element whose data the
    // caller is about to consume.
    let references = signed_info.find_children(DS_NS, "Reference");
    let reference = match references.as_slice() {
        [] => {
            return Err(SpError::new(
                ErrorKind::NoSignedElement,
                "SignedInfo has no Reference",
            ))
        }
        [one] => *one,
        _ => {
            return Err(SpError::new(
                ErrorKind::DuplicatedSignedElement,
                "SignedInfo has more than one Reference",
            ))
        }
    };

    let uri = reference.attr("URI").unwrap_or("");
    let reference_id = uri.strip_prefix('#').ok_or_else(|| {
        SpError::new(
            ErrorKind::InvalidSignature,
            format!("reference URI {uri:?} is not a local ID reference"),
        )
    })?;
    let target_id = target
        .attr("ID")
        .ok_or_else(|| SpError::new(ErrorKind::InvalidSignature, "signed element has no ID"))?;
    if reference_id != target_id {
        return Err(SpError::new(
            ErrorKind::InvalidSignature,
            format!("reference covers {reference_id:?}, expected {target_id:?}"),
        ));
    }
    if doc.id_counts().get(reference_id).copied().unwrap_or(0) != 1 {
        return Err(SpError::new(
            ErrorKind::DuplicatedSignedElement,
            format!("ID {reference_id:?} appears on more than one element"),
        ));
    }

    // Transforms: enveloped-signature, then exclusive C14N. Nothing else.
    let transforms: Vec<&str> = reference
        .find_child(DS_NS, "Transforms")
        .map(|t| {
            t.find_children(DS_NS, "Transform")
                .iter()
                .filter_map(|tr| tr.attr("Algorithm"))
                .collect()
        })
        .unwrap_or_default();
    let digest_with_comments = match transforms.as_slice() {
        [TRANSFORM_ENVELOPED, EXC_C14N] => false,
        [TRANSFORM_ENVELOPED, EXC_C14N_WITH_COMMENTS] => true,
        _ => {
            return Err(SpError::new(
                ErrorKind::InvalidSignature,
                format!("transform chain {transforms:?} is not allowed"),
            ))
        }
    };

    let algorithm = required_algorithm(signed_info, "SignatureMethod", SignatureAlgorithm::from_uri)?;
    let digest_algorithm = required_algorithm(reference, "DigestMethod", DigestAlgorithm::from_uri)?;
    if reject_deprecated && (algorithm.is_deprecated() || digest_algorithm.is_deprecated()) {
        return Err(SpError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            "deprecated signature or digest algorithm rejected by policy",
        ));
    }

    let si_with_comments = match signed_info
        .find_child(DS_NS, "CanonicalizationMethod")
        .and_then(|c| c.attr("Algorithm"))
    {
        Some(EXC_C14N) => false,
        Some(EXC_C14N_WITH_COMMENTS) => true,
        other => {
            return Err(SpError::new(
                ErrorKind::InvalidSignature,
                format!("canonicalization method {other:?} is not allowed"),
            ))
        }
    };

    // Reference digest over the target with this signature removed
    // (enveloped transform).
    let expected_digest = reference
        .find_child(DS_NS, "DigestValue")
        .map(|d| strip_ws(&d.text()))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| SpError::new(ErrorKind::InvalidSignature, "reference has no DigestValue"))?;
    let mut detached = target.clone();
    detached.remove_children(DS_NS, "Signature");
    let canonical = exclusive_c14n(&detached, doc, digest_with_comments);
    let computed = hash::hash(digest_algorithm, canonical.as_bytes());
    let computed_b64 = base64::engine::general_purpose::STANDARD.encode(computed);
    if computed_b64 != expected_digest {
        return Err(SpError::new(
            ErrorKind::InvalidSignature,
            "reference digest mismatch",
        ));
    }

    // Signature over the canonicalized SignedInfo.
    let canonical_signed_info = exclusive_c14n(signed_info, doc, si_with_comments);
    let signature_value = signature
        .find_child(DS_NS, "SignatureValue")
        .map(|v| strip_ws(&v.text()))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SpError::new(ErrorKind::InvalidSignature, "signature has no value"))?;
    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(&signature_value)
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, format!("signature base64: {e}")))?;

    verify_with_anchors(
        anchors,
        signature,
        canonical_signed_info.as_bytes(),
        &signature_bytes,
        algorithm,
    )?;

    Ok(VerifiedSignature {
        algorithm,
        digest_algorithm,
    })
}

fn verify_with_anchors(
    anchors: &TrustAnchors<'_>,
    signature: &Element,
    data: &[u8],
    signature_bytes: &[u8],
    algorithm: SignatureAlgorithm,
) -> SpResult<()> {
    if !anchors.certificates.is_empty() {
        for cert in anchors.certificates {
            let public_key = cert
                .public_key_pkcs1()
                .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;
            if rsa::verify(&public_key, data, signature_bytes, algorithm).unwrap_or(false) {
                return Ok(());
            }
        }
        return Err(SpError::new(
            ErrorKind::InvalidSignature,
            "no configured IdP certificate validated the signature",
        ));
    }

    // Fingerprint mode: trust the embedded certificate only when its digest
    // matches a pinned fingerprint.
    let embedded_b64 = signature
        .find_descendants(DS_NS, "X509Certificate")
        .first()
        .map(|c| strip_ws(&c.text()))
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            SpError::new(
                ErrorKind::InvalidSignature,
                "no certificate embedded in the signature and none configured",
            )
        })?;
    let der = base64::engine::general_purpose::STANDARD
        .decode(&embedded_b64)
        .map_err(|e| {
            SpError::new(ErrorKind::InvalidSignature, format!("certificate base64: {e}"))
        })?;
    let embedded = Certificate::from_der(der)
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;

    let fingerprint = embedded.fingerprint(anchors.fingerprint_algorithm);
    if !anchors
        .fingerprints
        .iter()
        .any(|f| normalize_fingerprint(f) == fingerprint)
    {
        return Err(SpError::new(
            ErrorKind::InvalidSignature,
            "embedded certificate does not match any pinned fingerprint",
        ));
    }

    let public_key = embedded
        .public_key_pkcs1()
        .map_err(|e| SpError::new(ErrorKind::InvalidSignature, e.to_string()))?;
    if rsa::verify(&public_key, data, signature_bytes, algorithm).unwrap_or(false) {
        Ok(())
    } else {
        Err(SpError::new(
            ErrorKind::InvalidSignature,
            "signature does not verify under the embedded certificate",
        ))
    }
}

fn required_algorithm<T>(
    parent: &Element,
    method: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> SpResult<T> {
    let uri = parent
        .find_child(DS_NS, method)
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| {
            SpError::new(
                ErrorKind::InvalidSignature,
                format!("signature is missing its {method}"),
            )
        })?;
    parse(uri).ok_or_else(|| {
        SpError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            format!("unsupported {method} {uri:?}"),
        )
    })
}

fn strip_ws(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

fn find_by_id_mut<'a>(element: &'a mut Element, id: &str) -> Option<&'a mut Element> {
    if element.attr("ID") == Some(id) {
        return Some(element);
    }
    for child in &mut element.children {
        if let XmlNode::Element(e) = child {
            if let Some(found) = find_by_id_mut(e, id) {
                return Some(found);
            }
        }
    }
    None
}

fn build_signed_info(
    reference_id: &str,
    digest_b64: &str,
    algorithm: SignatureAlgorithm,
    digest_algorithm: DigestAlgorithm,
) -> String {
    format!(
        concat!(
            r##"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"##,
            r##"<ds:CanonicalizationMethod Algorithm="{c14n}"/>"##,
            r##"<ds:SignatureMethod Algorithm="{sig}"/>"##,
            r##"<ds:Reference URI="#{id}">"##,
            r##"<ds:Transforms>"##,
            r##"<ds:Transform Algorithm="{enveloped}"/>"##,
            r##"<ds:Transform Algorithm="{c14n}"/>"##,
            r##"</ds:Transforms>"##,
            r##"<ds:DigestMethod Algorithm="{digest}"/>"##,
            r##"<ds:DigestValue>{value}</ds:DigestValue>"##,
            r##"</ds:Reference>"##,
            r##"</ds:SignedInfo>"##
        ),
        c14n = EXC_C14N,
        sig = algorithm.uri(),
        id = reference_id,
        enveloped = TRANSFORM_ENVELOPED,
        digest = digest_algorithm.uri(),
        value = digest_b64,
    )
}

fn build_signature_element(
    signed_info: &str,
    signature_b64: &str,
    certificate: Option<&Certificate>,
) -> String {
    let key_info = certificate
        .map(|cert| {
            format!(
                concat!(
                    r#"<ds:KeyInfo><ds:X509Data>"#,
                    r#"<ds:X509Certificate>{}</ds:X509Certificate>"#,
                    r#"</ds:X509Data></ds:KeyInfo>"#
                ),
                cert.to_base64()
            )
        })
        .unwrap_or_default();

    format!(
        concat!(
            r##"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"##,
            r##"{signed_info}"##,
            r##"<ds:SignatureValue>{value}</ds:SignatureValue>"##,
            r##"{key_info}"##,
            r##"</ds:Signature>"##
        ),
        signed_info = signed_info,
        value = signature_b64,
        key_info = key_info,
    )
}
