//! Digest functions backed by aws-lc-rs.
//!
//! SHA-1 is kept for interoperability with identity providers that still
//! sign with RSA-SHA1; the validators decide whether to accept it.

use aws_lc_rs::digest;

use crate::algorithm::DigestAlgorithm;

/// Computes a digest of the input data.
#[must_use]
pub fn hash(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    let alg = match algorithm {
        DigestAlgorithm::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
        DigestAlgorithm::Sha256 => &digest::SHA256,
        DigestAlgorithm::Sha384 => &digest::SHA384,
        DigestAlgorithm::Sha512 => &digest::SHA512,
    };

    digest::digest(alg, data).as_ref().to_vec()
}

/// Computes a SHA-256 digest of the input data.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    hash(DigestAlgorithm::Sha256, data)
}

/// Encodes bytes as lowercase hex.
#[must_use]
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
