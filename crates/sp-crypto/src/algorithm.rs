//! Algorithm identifiers used by XML Signature and XML Encryption.
//!
//! Each enum maps to and from the W3C algorithm URIs that appear on the
//! wire. Deprecated members stay parseable so that policy decisions happen
//! in the validators, not in the parser.

use serde::{Deserialize, Serialize};

/// XML-DSig signature algorithms (RSA PKCS#1 v1.5 family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-1 (deprecated).
    RsaSha1,
    /// RSA with SHA-256 (default).
    #[default]
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the XML-DSig URI for this algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2000/09/xmldsig#rsa-sha1" => Some(Self::RsaSha1),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Some(Self::RsaSha256),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Some(Self::RsaSha384),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Some(Self::RsaSha512),
            _ => None,
        }
    }

    /// Returns the digest algorithm this signature algorithm is built on.
    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha384 => DigestAlgorithm::Sha384,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }

    /// Returns true for algorithms the deprecation policy refuses.
    #[must_use]
    pub const fn is_deprecated(&self) -> bool {
        matches!(self, Self::RsaSha1)
    }
}

/// XML-DSig digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated).
    Sha1,
    /// SHA-256 (default).
    #[default]
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Returns the XML-DSig URI for this digest.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            Self::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            Self::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Parses a digest algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2000/09/xmldsig#sha1" => Some(Self::Sha1),
            "http://www.w3.org/2001/04/xmlenc#sha256" => Some(Self::Sha256),
            "http://www.w3.org/2001/04/xmldsig-more#sha384" => Some(Self::Sha384),
            "http://www.w3.org/2001/04/xmlenc#sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Parses a digest algorithm from a short fingerprint-algorithm name
    /// (`sha1`, `sha256`, `sha384`, `sha512`), case-insensitive.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    /// Digest output length in bytes.
    #[must_use]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Returns true for digests the deprecation policy refuses.
    #[must_use]
    pub const fn is_deprecated(&self) -> bool {
        matches!(self, Self::Sha1)
    }
}

/// XML Encryption block-cipher algorithms for content decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCipher {
    /// AES-128 in CBC mode.
    Aes128Cbc,
    /// AES-192 in CBC mode.
    Aes192Cbc,
    /// AES-256 in CBC mode.
    Aes256Cbc,
    /// AES-128 in GCM mode (XML Encryption 1.1).
    Aes128Gcm,
    /// AES-192 in GCM mode (XML Encryption 1.1).
    Aes192Gcm,
    /// AES-256 in GCM mode (XML Encryption 1.1).
    Aes256Gcm,
    /// Triple-DES in CBC mode.
    TripleDesCbc,
}

impl BlockCipher {
    /// Returns the XML-Enc URI for this cipher.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
            Self::Aes192Cbc => "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
            Self::Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
            Self::Aes128Gcm => "http://www.w3.org/2009/xmlenc11#aes128-gcm",
            Self::Aes192Gcm => "http://www.w3.org/2009/xmlenc11#aes192-gcm",
            Self::Aes256Gcm => "http://www.w3.org/2009/xmlenc11#aes256-gcm",
            Self::TripleDesCbc => "http://www.w3.org/2001/04/xmlenc#tripledes-cbc",
        }
    }

    /// Parses a block cipher from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => Some(Self::Aes128Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes192-cbc" => Some(Self::Aes192Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => Some(Self::Aes256Cbc),
            "http://www.w3.org/2009/xmlenc11#aes128-gcm" => Some(Self::Aes128Gcm),
            "http://www.w3.org/2009/xmlenc11#aes192-gcm" => Some(Self::Aes192Gcm),
            "http://www.w3.org/2009/xmlenc11#aes256-gcm" => Some(Self::Aes256Gcm),
            "http://www.w3.org/2001/04/xmlenc#tripledes-cbc" => Some(Self::TripleDesCbc),
            _ => None,
        }
    }

    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes128Gcm => 16,
            Self::Aes192Cbc | Self::Aes192Gcm | Self::TripleDesCbc => 24,
            Self::Aes256Cbc | Self::Aes256Gcm => 32,
        }
    }

    /// IV length in bytes as prefixed to the cipher value.
    #[must_use]
    pub const fn iv_len(&self) -> usize {
        match self {
            Self::Aes128Cbc | Self::Aes192Cbc | Self::Aes256Cbc => 16,
            Self::Aes128Gcm | Self::Aes192Gcm | Self::Aes256Gcm => 12,
            Self::TripleDesCbc => 8,
        }
    }

    /// Block size in bytes (CBC padding granularity).
    #[must_use]
    pub const fn block_len(&self) -> usize {
        match self {
            Self::TripleDesCbc => 8,
            _ => 16,
        }
    }

    /// Returns true for GCM-mode ciphers.
    #[must_use]
    pub const fn is_gcm(&self) -> bool {
        matches!(self, Self::Aes128Gcm | Self::Aes192Gcm | Self::Aes256Gcm)
    }
}

/// XML Encryption key-transport algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyTransport {
    /// RSA-OAEP with MGF1/SHA-1 (default).
    #[default]
    RsaOaepMgf1p,
    /// RSA PKCS#1 v1.5 (deprecated).
    Rsa15,
}

impl KeyTransport {
    /// Returns the XML-Enc URI for this key-transport algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaOaepMgf1p => "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
            Self::Rsa15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
        }
    }

    /// Parses a key-transport algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p" => Some(Self::RsaOaepMgf1p),
            "http://www.w3.org/2001/04/xmlenc#rsa-1_5" => Some(Self::Rsa15),
            _ => None,
        }
    }

    /// Returns true for transports the deprecation policy refuses.
    #[must_use]
    pub const fn is_deprecated(&self) -> bool {
        matches!(self, Self::Rsa15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_algorithm_uri_roundtrip() {
        for alg in [
            SignatureAlgorithm::RsaSha1,
            SignatureAlgorithm::RsaSha256,
            SignatureAlgorithm::RsaSha384,
            SignatureAlgorithm::RsaSha512,
        ] {
            assert_eq!(SignatureAlgorithm::from_uri(alg.uri()), Some(alg));
        }
    }

    #[test]
    fn digest_algorithm_uri_roundtrip() {
        for alg in [
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
            DigestAlgorithm::Sha384,
            DigestAlgorithm::Sha512,
        ] {
            assert_eq!(DigestAlgorithm::from_uri(alg.uri()), Some(alg));
        }
    }

    #[test]
    fn digest_algorithm_from_name_is_case_insensitive() {
        assert_eq!(DigestAlgorithm::from_name("SHA256"), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::from_name("sha1"), Some(DigestAlgorithm::Sha1));
        assert_eq!(DigestAlgorithm::from_name("md5"), None);
    }

    #[test]
    fn block_cipher_uri_roundtrip() {
        for alg in [
            BlockCipher::Aes128Cbc,
            BlockCipher::Aes192Cbc,
            BlockCipher::Aes256Cbc,
            BlockCipher::Aes128Gcm,
            BlockCipher::Aes256Gcm,
            BlockCipher::TripleDesCbc,
        ] {
            assert_eq!(BlockCipher::from_uri(alg.uri()), Some(alg));
        }
    }

    #[test]
    fn deprecated_markers() {
        assert!(SignatureAlgorithm::RsaSha1.is_deprecated());
        assert!(!SignatureAlgorithm::RsaSha256.is_deprecated());
        assert!(DigestAlgorithm::Sha1.is_deprecated());
        assert!(KeyTransport::Rsa15.is_deprecated());
        assert!(!KeyTransport::RsaOaepMgf1p.is_deprecated());
    }

    #[test]
    fn cipher_parameters() {
        assert_eq!(BlockCipher::Aes128Cbc.key_len(), 16);
        assert_eq!(BlockCipher::Aes256Gcm.key_len(), 32);
        assert_eq!(BlockCipher::Aes128Gcm.iv_len(), 12);
        assert_eq!(BlockCipher::TripleDesCbc.iv_len(), 8);
        assert_eq!(BlockCipher::TripleDesCbc.block_len(), 8);
        assert!(BlockCipher::Aes192Gcm.is_gcm());
        assert!(!BlockCipher::Aes192Cbc.is_gcm());
    }
}
