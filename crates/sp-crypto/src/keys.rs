//! Private key and certificate handling.
//!
//! Keys arrive as PEM (settings files, environment) and are held as DER for
//! the signing and decryption backends. Private-key material is zeroized
//! when the container drops.

use base64::Engine;
use x509_parser::prelude::*;
use zeroize::Zeroize;

use crate::algorithm::DigestAlgorithm;
use crate::error::{CryptoError, CryptoResult};
use crate::hash::{hash, to_hex};

/// Extracts DER data from a PEM string with the given label.
#[must_use]
pub fn pem_to_der(pem: &str, label: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let start = pem.find(&begin)? + begin.len();
    let end_pos = pem.find(&end)?;

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD.decode(&b64_data).ok()
}

/// An RSA private key held in memory for the lifetime of one request.
pub struct PrivateKey {
    pem: String,
    der: Vec<u8>,
}

impl PrivateKey {
    /// Parses a private key from PEM (`PRIVATE KEY` or `RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let der = pem_to_der(pem, "PRIVATE KEY")
            .or_else(|| pem_to_der(pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| CryptoError::InvalidKey("not a private key PEM".to_string()))?;

        Ok(Self {
            pem: pem.to_string(),
            der,
        })
    }

    /// The DER-encoded key (PKCS#8 or PKCS#1, as supplied).
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The original PEM encoding.
    #[must_use]
    pub fn pem(&self) -> &str {
        &self.pem
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.pem.zeroize();
        self.der.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// An X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Parses a certificate from PEM, or from the bare base64 body commonly
    /// pasted out of IdP metadata.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let der = if pem.contains("-----BEGIN CERTIFICATE-----") {
            pem_to_der(pem, "CERTIFICATE")
                .ok_or_else(|| CryptoError::InvalidCertificate("malformed PEM".to_string()))?
        } else {
            let b64: String = pem.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(&b64)
                .map_err(|e| CryptoError::InvalidCertificate(format!("base64: {e}")))?
        };

        Self::from_der(der)
    }

    /// Wraps DER bytes, checking they parse as an X.509 certificate.
    pub fn from_der(der: Vec<u8>) -> CryptoResult<Self> {
        X509Certificate::from_der(&der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        Ok(Self { der })
    }

    /// The DER encoding.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The base64 of the DER encoding, as embedded in `<ds:X509Certificate>`.
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.der)
    }

    /// Computes the certificate fingerprint as lowercase hex without
    /// separators.
    #[must_use]
    pub fn fingerprint(&self, algorithm: DigestAlgorithm) -> String {
        to_hex(&hash(algorithm, &self.der))
    }

    /// Extracts the RSA public key as PKCS#1 `RSAPublicKey` DER, the format
    /// the signature backend verifies against.
    pub fn public_key_pkcs1(&self) -> CryptoResult<Vec<u8>> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        let key_bits: &[u8] = &cert.public_key().subject_public_key.data;
        Ok(key_bits.to_vec())
    }
}

/// Normalizes a configured fingerprint for comparison: lowercase, colons
/// stripped.
#[must_use]
pub fn normalize_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
