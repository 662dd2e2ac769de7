//! EncryptedAssertion / EncryptedID handling.
//!
//! Decryption unwraps the content-encryption key from the
//! `<xenc:EncryptedKey>` with the SP private key, then decrypts the
//! `<xenc:EncryptedData>` payload and parses the plaintext as the element
//! that replaces the encrypted one. Encryption (used for outbound NameIDs)
//! is the reverse with a fresh AES-128-CBC key wrapped to the IdP
//! certificate.

use base64::Engine;
use sp_core::{ErrorKind, SpError, SpResult};
use sp_crypto::{cipher, random, BlockCipher, Certificate, KeyTransport, PrivateKey};

use crate::constants::XENC_NS;
use crate::xml::dom::{Document, Element};

fn decryption_error(detail: impl Into<String>) -> SpError {
    SpError::new(ErrorKind::DecryptionError, detail)
}

/// Decrypts an `<saml:EncryptedAssertion>` or `<saml:EncryptedID>` element,
/// returning the plaintext element.
pub fn decrypt_element(
    encrypted: &Element,
    key: &PrivateKey,
    reject_deprecated: bool,
) -> SpResult<Element> {
    let enc_data = encrypted
        .find_child(XENC_NS, "EncryptedData")
        .ok_or_else(|| decryption_error("no EncryptedData"))?;

    let cipher_uri = enc_data
        .find_child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| decryption_error("EncryptedData has no EncryptionMethod"))?;
    let block_cipher = BlockCipher::from_uri(cipher_uri)
        .ok_or_else(|| decryption_error(format!("unsupported content cipher {cipher_uri:?}")))?;

    let encrypted_key = encrypted
        .find_descendants(XENC_NS, "EncryptedKey")
        .into_iter()
        .next()
        .ok_or_else(|| decryption_error("no EncryptedKey"))?;

    let transport_uri = encrypted_key
        .find_child(XENC_NS, "EncryptionMethod")
        .and_then(|m| m.attr("Algorithm"))
        .ok_or_else(|| decryption_error("EncryptedKey has no EncryptionMethod"))?;
    let transport = KeyTransport::from_uri(transport_uri)
        .ok_or_else(|| decryption_error(format!("unsupported key transport {transport_uri:?}")))?;
    if reject_deprecated && transport.is_deprecated() {
        return Err(SpError::new(
            ErrorKind::InvalidSignatureAlgorithm,
            format!("{} key transport is deprecated", transport.uri()),
        ));
    }

    let wrapped = cipher_value(encrypted_key)?;
    let cek = cipher::unwrap_key(key, &wrapped, transport).map_err(SpError::from)?;

    let payload = cipher_value(enc_data)?;
    let plaintext = cipher::decrypt(block_cipher, &cek, &payload).map_err(SpError::from)?;
    let xml = String::from_utf8(plaintext)
        .map_err(|e| decryption_error(format!("plaintext is not UTF-8: {e}")))?;

    let doc = Document::parse(&xml)
        .map_err(|e| decryption_error(format!("plaintext is not well-formed: {}", e.detail)))?;
    Ok(doc.root)
}

fn cipher_value(parent: &Element) -> SpResult<Vec<u8>> {
    let value = parent
        .find_child(XENC_NS, "CipherData")
        .and_then(|cd| cd.find_child(XENC_NS, "CipherValue"))
        .map(|cv| cv.text())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| decryption_error("no CipherValue"))?;
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| decryption_error(format!("CipherValue base64: {e}")))
}

/// Encrypts an XML fragment into an `<xenc:EncryptedData>` element.
pub fn encrypt_element(
    plain_xml: &str,
    certificate: &Certificate,
    block_cipher: BlockCipher,
    transport: KeyTransport,
) -> SpResult<String> {
    let cek = random::random_bytes(block_cipher.key_len());
    let payload = cipher::encrypt(block_cipher, &cek, plain_xml.as_bytes())
        .map_err(SpError::from)?;
    let wrapped = cipher::wrap_key(certificate, &cek, transport).map_err(SpError::from)?;

    Ok(format!(
        concat!(
            r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" "#,
            r#"Type="http://www.w3.org/2001/04/xmlenc#Element">"#,
            r#"<xenc:EncryptionMethod Algorithm="{cipher}"/>"#,
            r#"<ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
            r#"<xenc:EncryptedKey>"#,
            r#"<xenc:EncryptionMethod Algorithm="{transport}"/>"#,
            r#"<xenc:CipherData><xenc:CipherValue>{wrapped}</xenc:CipherValue></xenc:CipherData>"#,
            r#"</xenc:EncryptedKey>"#,
            r#"</ds:KeyInfo>"#,
            r#"<xenc:CipherData><xenc:CipherValue>{payload}</xenc:CipherValue></xenc:CipherData>"#,
            r#"</xenc:EncryptedData>"#
        ),
        cipher = block_cipher.uri(),
        transport = transport.uri(),
        wrapped = base64::engine::general_purpose::STANDARD.encode(wrapped),
        payload = base64::engine::general_purpose::STANDARD.encode(payload),
    ))
}

/// Encrypts a `<saml:NameID>` fragment into the `<saml:EncryptedID>` body
/// used by outbound LogoutRequests.
pub fn encrypt_name_id(name_id_xml: &str, certificate: &Certificate) -> SpResult<String> {
    let encrypted = encrypt_element(
        name_id_xml,
        certificate,
        BlockCipher::Aes128Cbc,
        KeyTransport::RsaOaepMgf1p,
    )?;
    Ok(format!("<saml:EncryptedID>{encrypted}</saml:EncryptedID>"))
}
