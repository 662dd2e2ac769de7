//! # sp-crypto
//!
//! Cryptographic primitives for the SAML 2.0 service-provider toolkit.
//!
//! This crate covers the algorithm families the SAML profiles require:
//!
//! - **Digests** - SHA-1 (legacy), SHA-256, SHA-384, SHA-512
//! - **Signatures** - RSA PKCS#1 v1.5 with each of the digests above
//! - **XML Encryption** - AES-CBC/GCM (128/192/256) and 3DES-CBC content
//!   decryption, RSA-OAEP-MGF1P and RSA-1.5 key transport
//! - **Key material** - PEM/DER private keys (zeroized on drop) and X.509
//!   certificates with fingerprint computation
//!
//! SHA-1 and RSA-1.5 remain available because deployed identity providers
//! still emit them; callers enforce their own deprecation policy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod algorithm;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod keys;
pub mod random;
pub mod rsa;

pub use algorithm::{BlockCipher, DigestAlgorithm, KeyTransport, SignatureAlgorithm};
pub use error::{CryptoError, CryptoResult};
pub use keys::{Certificate, PrivateKey};
