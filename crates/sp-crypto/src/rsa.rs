//! RSA PKCS#1 v1.5 signing and verification.
//!
//! The SHA-256/384/512 paths go through aws-lc-rs. aws-lc-rs does not
//! expose SHA-1 PKCS#1 operations, so the deprecated SHA-1 arms are routed
//! through OpenSSL.

use aws_lc_rs::{
    rand::SystemRandom,
    signature::{self, RsaKeyPair, UnparsedPublicKey},
};

use crate::algorithm::SignatureAlgorithm;
use crate::error::{CryptoError, CryptoResult};
use crate::keys::PrivateKey;

/// Signs data with the given RSA private key.
///
/// # Errors
///
/// Returns an error if the key cannot be parsed or the backend fails.
pub fn sign(key: &PrivateKey, data: &[u8], algorithm: SignatureAlgorithm) -> CryptoResult<Vec<u8>> {
    if algorithm == SignatureAlgorithm::RsaSha1 {
        return sign_sha1(key, data);
    }

    let key_pair = RsaKeyPair::from_der(key.der())
        .or_else(|_| RsaKeyPair::from_pkcs8(key.der()))
        .map_err(|e| CryptoError::InvalidKey(format!("RSA key rejected: {e}")))?;

    let padding = match algorithm {
        SignatureAlgorithm::RsaSha256 => &signature::RSA_PKCS1_SHA256,
        SignatureAlgorithm::RsaSha384 => &signature::RSA_PKCS1_SHA384,
        SignatureAlgorithm::RsaSha512 => &signature::RSA_PKCS1_SHA512,
        SignatureAlgorithm::RsaSha1 => unreachable!(),
    };

    let rng = SystemRandom::new();
    let mut sig = vec![0u8; key_pair.public_modulus_len()];
    key_pair
        .sign(padding, &rng, data, &mut sig)
        .map_err(|e| CryptoError::Signing(format!("RSA signing failed: {e}")))?;

    Ok(sig)
}

fn sign_sha1(key: &PrivateKey, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let pkey = openssl::pkey::PKey::private_key_from_pem(key.pem().as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("RSA key rejected: {e}")))?;
    let mut signer = openssl::sign::Signer::new(openssl::hash::MessageDigest::sha1(), &pkey)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    signer
        .update(data)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;
    signer
        .sign_to_vec()
        .map_err(|e| CryptoError::Signing(e.to_string()))
}

/// Verifies an RSA signature against a PKCS#1 `RSAPublicKey` DER key.
///
/// Returns `Ok(true)` when the signature verifies, `Ok(false)` when it does
/// not; errors are reserved for malformed inputs elsewhere in the pipeline.
pub fn verify(
    public_key_pkcs1: &[u8],
    data: &[u8],
    sig: &[u8],
    algorithm: SignatureAlgorithm,
) -> CryptoResult<bool> {
    let verification_alg: &dyn signature::VerificationAlgorithm = match algorithm {
        SignatureAlgorithm::RsaSha1 => return verify_sha1(public_key_pkcs1, data, sig),
        SignatureAlgorithm::RsaSha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        SignatureAlgorithm::RsaSha384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        SignatureAlgorithm::RsaSha512 => &signature::RSA_PKCS1_2048_8192_SHA512,
    };

    let public_key = UnparsedPublicKey::new(verification_alg, public_key_pkcs1);
    Ok(public_key.verify(data, sig).is_ok())
}

fn verify_sha1(public_key_pkcs1: &[u8], data: &[u8], sig: &[u8]) -> CryptoResult<bool> {
    let rsa = openssl::rsa::Rsa::public_key_from_der_pkcs1(public_key_pkcs1)
        .map_err(|e| CryptoError::InvalidKey(format!("RSA public key rejected: {e}")))?;
    let pkey = openssl::pkey::PKey::from_rsa(rsa)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let mut verifier = openssl::sign::Verifier::new(openssl::hash::MessageDigest::sha1(), &pkey)
        .map_err(|e| CryptoError::Verification(e.to_string()))?;
    verifier
        .update(data)
        .map_err(|e| CryptoError::Verification(e.to_string()))?;
    Ok(verifier.verify(sig).unwrap_or(false))
}
