//! Error vocabulary for the service-provider core.
//!
//! Validation failures are reported as an [`ErrorKind`] plus a detail
//! string. The kind labels are stable: telemetry and tests key off them, so
//! renaming a label is a breaking change.

use thiserror::Error;

/// Result type for service-provider operations.
pub type SpResult<T> = Result<T, SpError>;

/// Stable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    SettingsInvalid,
    PrivateKeyNotFound,
    SamlResponseNotFound,
    SamlLogoutMessageNotFound,
    InvalidXml,
    SchemaViolation,
    InvalidXmlNamespace,
    InvalidSignature,
    NoSignedElement,
    DuplicatedSignedElement,
    InvalidSignatureAlgorithm,
    InvalidIssuer,
    InvalidAudience,
    InvalidDestination,
    InvalidNameId,
    InvalidNameIdFormat,
    InvalidInResponseTo,
    UnexpectedInResponseTo,
    AssertionExpired,
    AssertionTooEarly,
    NoAuthnStatement,
    NoAttributeStatements,
    ResponseStatusError,
    EncryptionError,
    DecryptionError,
    SingleLogoutNotSupported,
}

impl ErrorKind {
    /// Returns the stable label for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SettingsInvalid => "SettingsInvalid",
            Self::PrivateKeyNotFound => "PrivateKeyNotFound",
            Self::SamlResponseNotFound => "SamlResponseNotFound",
            Self::SamlLogoutMessageNotFound => "SamlLogoutMessageNotFound",
            Self::InvalidXml => "InvalidXml",
            Self::SchemaViolation => "SchemaViolation",
            Self::InvalidXmlNamespace => "InvalidXmlNamespace",
            Self::InvalidSignature => "InvalidSignature",
            Self::NoSignedElement => "NoSignedElement",
            Self::DuplicatedSignedElement => "DuplicatedSignedElement",
            Self::InvalidSignatureAlgorithm => "InvalidSignatureAlgorithm",
            Self::InvalidIssuer => "InvalidIssuer",
            Self::InvalidAudience => "InvalidAudience",
            Self::InvalidDestination => "InvalidDestination",
            Self::InvalidNameId => "InvalidNameId",
            Self::InvalidNameIdFormat => "InvalidNameIdFormat",
            Self::InvalidInResponseTo => "InvalidInResponseTo",
            Self::UnexpectedInResponseTo => "UnexpectedInResponseTo",
            Self::AssertionExpired => "AssertionExpired",
            Self::AssertionTooEarly => "AssertionTooEarly",
            Self::NoAuthnStatement => "NoAuthnStatement",
            Self::NoAttributeStatements => "NoAttributeStatements",
            Self::ResponseStatusError => "ResponseStatusError",
            Self::EncryptionError => "EncryptionError",
            Self::DecryptionError => "DecryptionError",
            Self::SingleLogoutNotSupported => "SingleLogoutNotSupported",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validation or configuration error: stable kind plus human detail.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct SpError {
    /// The stable error category.
    pub kind: ErrorKind,
    /// Human-readable detail for logs and diagnostics.
    pub detail: String,
}

impl SpError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<sp_crypto::CryptoError> for SpError {
    fn from(err: sp_crypto::CryptoError) -> Self {
        let kind = match &err {
            sp_crypto::CryptoError::Decryption(_) => ErrorKind::DecryptionError,
            sp_crypto::CryptoError::Encryption(_) => ErrorKind::EncryptionError,
            sp_crypto::CryptoError::UnsupportedAlgorithm(_) => ErrorKind::InvalidSignatureAlgorithm,
            sp_crypto::CryptoError::InvalidKey(_) => ErrorKind::PrivateKeyNotFound,
            _ => ErrorKind::InvalidSignature,
        };
        Self::new(kind, err.to_string())
    }
}
