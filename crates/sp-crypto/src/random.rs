//! Cryptographically secure random generation for protocol identifiers.

use rand::Rng;

use crate::hash::to_hex;

/// Generates a cryptographically secure random byte array.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a fresh SAML message ID.
///
/// The ID carries 128 bits of entropy and starts with an underscore so it
/// is a valid `xs:ID` (which must not begin with a digit).
#[must_use]
pub fn message_id() -> String {
    format!("_{}", to_hex(&random_bytes(16)))
}
