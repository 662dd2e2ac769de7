//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Private key could not be parsed or is unusable.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Certificate could not be parsed.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Signing operation failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature did not verify.
    #[error("signature verification failed: {0}")]
    Verification(String),

    /// Decryption failed (bad key, corrupt ciphertext, or invalid padding).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Algorithm URI is unknown or not supported by this build.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}
