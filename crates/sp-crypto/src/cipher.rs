//! XML Encryption content ciphers and key transport.
//!
//! Cipher values carry the IV as a prefix (and, for GCM, the tag as a
//! suffix). CBC padding follows XML-Enc: the final byte is the pad length
//! and the pad bytes themselves are unconstrained, so OpenSSL's strict
//! PKCS#7 check cannot be used on the decrypt path.

use openssl::symm::{Cipher, Crypter, Mode};

use crate::algorithm::{BlockCipher, KeyTransport};
use crate::error::{CryptoError, CryptoResult};
use crate::keys::{Certificate, PrivateKey};
use crate::random::random_bytes;

const GCM_TAG_LEN: usize = 16;

fn openssl_cipher(algorithm: BlockCipher) -> Cipher {
    match algorithm {
        BlockCipher::Aes128Cbc => Cipher::aes_128_cbc(),
        BlockCipher::Aes192Cbc => Cipher::aes_192_cbc(),
        BlockCipher::Aes256Cbc => Cipher::aes_256_cbc(),
        BlockCipher::Aes128Gcm => Cipher::aes_128_gcm(),
        BlockCipher::Aes192Gcm => Cipher::aes_192_gcm(),
        BlockCipher::Aes256Gcm => Cipher::aes_256_gcm(),
        BlockCipher::TripleDesCbc => Cipher::des_ede3_cbc(),
    }
}

/// Decrypts an XML-Enc cipher value (IV-prefixed, tag-suffixed for GCM).
pub fn decrypt(algorithm: BlockCipher, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
    if key.len() != algorithm.key_len() {
        return Err(CryptoError::Decryption(format!(
            "key length {} does not match {}",
            key.len(),
            algorithm.uri()
        )));
    }

    let iv_len = algorithm.iv_len();
    if algorithm.is_gcm() {
        if data.len() < iv_len + GCM_TAG_LEN {
            return Err(CryptoError::Decryption("cipher value too short".to_string()));
        }
        let (iv, rest) = data.split_at(iv_len);
        let (ciphertext, tag) = rest.split_at(rest.len() - GCM_TAG_LEN);
        return openssl::symm::decrypt_aead(
            openssl_cipher(algorithm),
            key,
            Some(iv),
            &[],
            ciphertext,
            tag,
        )
        .map_err(|e| CryptoError::Decryption(format!("AEAD decrypt: {e}")));
    }

    if data.len() < iv_len + algorithm.block_len() {
        return Err(CryptoError::Decryption("cipher value too short".to_string()));
    }
    let (iv, ciphertext) = data.split_at(iv_len);
    if ciphertext.len() % algorithm.block_len() != 0 {
        return Err(CryptoError::Decryption(
            "cipher value is not block-aligned".to_string(),
        ));
    }

    let cipher = openssl_cipher(algorithm);
    let mut crypter = Crypter::new(cipher, Mode::Decrypt, key, Some(iv))
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    crypter.pad(false);

    let mut plaintext = vec![0u8; ciphertext.len() + cipher.block_size()];
    let mut count = crypter
        .update(ciphertext, &mut plaintext)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    count += crypter
        .finalize(&mut plaintext[count..])
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    plaintext.truncate(count);

    strip_padding(plaintext, algorithm.block_len())
}

fn strip_padding(mut plaintext: Vec<u8>, block_len: usize) -> CryptoResult<Vec<u8>> {
    let pad = *plaintext
        .last()
        .ok_or_else(|| CryptoError::Decryption("empty plaintext".to_string()))?
        as usize;
    if pad == 0 || pad > block_len || pad > plaintext.len() {
        return Err(CryptoError::Decryption("invalid block padding".to_string()));
    }
    plaintext.truncate(plaintext.len() - pad);
    Ok(plaintext)
}

/// Encrypts plaintext under a fresh IV, producing an XML-Enc cipher value.
pub fn encrypt(algorithm: BlockCipher, key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    if key.len() != algorithm.key_len() {
        return Err(CryptoError::Encryption(format!(
            "key length {} does not match {}",
            key.len(),
            algorithm.uri()
        )));
    }

    let iv = random_bytes(algorithm.iv_len());

    if algorithm.is_gcm() {
        let mut tag = vec![0u8; GCM_TAG_LEN];
        let ciphertext = openssl::symm::encrypt_aead(
            openssl_cipher(algorithm),
            key,
            Some(&iv),
            &[],
            plaintext,
            &mut tag,
        )
        .map_err(|e| CryptoError::Encryption(format!("AEAD encrypt: {e}")))?;

        let mut out = iv;
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        return Ok(out);
    }

    let ciphertext = openssl::symm::encrypt(openssl_cipher(algorithm), key, Some(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = iv;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwraps a content-encryption key with the SP private key.
pub fn unwrap_key(
    key: &PrivateKey,
    wrapped: &[u8],
    transport: KeyTransport,
) -> CryptoResult<Vec<u8>> {
    let pkey = openssl::pkey::PKey::private_key_from_pem(key.pem().as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let rsa = pkey
        .rsa()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

    let padding = match transport {
        KeyTransport::RsaOaepMgf1p => openssl::rsa::Padding::PKCS1_OAEP,
        KeyTransport::Rsa15 => openssl::rsa::Padding::PKCS1,
    };

    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .private_decrypt(wrapped, &mut out, padding)
        .map_err(|e| CryptoError::Decryption(format!("key unwrap: {e}")))?;
    out.truncate(len);
    Ok(out)
}

/// Wraps a content-encryption key to the recipient certificate.
pub fn wrap_key(
    certificate: &Certificate,
    key: &[u8],
    transport: KeyTransport,
) -> CryptoResult<Vec<u8>> {
    let x509 = openssl::x509::X509::from_der(certificate.der())
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
    let rsa = x509
        .public_key()
        .and_then(|pk| pk.rsa())
        .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;

    let padding = match transport {
        KeyTransport::RsaOaepMgf1p => openssl::rsa::Padding::PKCS1_OAEP,
        KeyTransport::Rsa15 => openssl::rsa::Padding::PKCS1,
    };

    let mut out = vec![0u8; rsa.size() as usize];
    let len = rsa
        .public_encrypt(key, &mut out, padding)
        .map_err(|e| CryptoError::Encryption(format!("key wrap: {e}")))?;
    out.truncate(len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_roundtrip_all_key_sizes() {
        for alg in [
            BlockCipher::Aes128Cbc,
            BlockCipher::Aes192Cbc,
            BlockCipher::Aes256Cbc,
            BlockCipher::TripleDesCbc,
        ] {
            let key = random_bytes(alg.key_len());
            let ct = encrypt(alg, &key, b"<Assertion>secret</Assertion>").unwrap();
            let pt = decrypt(alg, &key, &ct).unwrap();
            assert_eq!(pt, b"<Assertion>secret</Assertion>");
        }
    }

    #[test]
    fn gcm_roundtrip() {
        for alg in [
            BlockCipher::Aes128Gcm,
            BlockCipher::Aes192Gcm,
            BlockCipher::Aes256Gcm,
        ] {
            let key = random_bytes(alg.key_len());
            let ct = encrypt(alg, &key, b"payload").unwrap();
            assert_eq!(decrypt(alg, &key, &ct).unwrap(), b"payload");
        }
    }

    #[test]
    fn gcm_rejects_tampered_ciphertext() {
        let key = random_bytes(16);
        let mut ct = encrypt(BlockCipher::Aes128Gcm, &key, b"payload").unwrap();
        let mid = ct.len() / 2;
        ct[mid] ^= 0x01;
        assert!(decrypt(BlockCipher::Aes128Gcm, &key, &ct).is_err());
    }

    #[test]
    fn cbc_wrong_key_length_rejected() {
        let key = random_bytes(16);
        assert!(decrypt(BlockCipher::Aes256Cbc, &key, &[0u8; 48]).is_err());
    }

    #[test]
    fn cbc_unaligned_ciphertext_rejected() {
        let key = random_bytes(16);
        assert!(decrypt(BlockCipher::Aes128Cbc, &key, &[0u8; 37]).is_err());
    }

    #[test]
    fn padding_stripping() {
        let mut data = b"plaintext".to_vec();
        data.extend_from_slice(&[7u8; 7]);
        assert_eq!(strip_padding(data, 16).unwrap(), b"plaintext");

        assert!(strip_padding(vec![0u8, 0u8], 16).is_err());
        assert!(strip_padding(vec![0u8, 17u8], 16).is_err());
    }

    #[test]
    fn key_wrap_roundtrip() {
        let rsa = openssl::rsa::Rsa::generate(2048).unwrap();
        let pkey = openssl::pkey::PKey::from_rsa(rsa).unwrap();
        let key_pem = String::from_utf8(pkey.private_key_to_pem_pkcs8().unwrap()).unwrap();
        let key = PrivateKey::from_pem(&key_pem).unwrap();

        let mut name = openssl::x509::X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "test").unwrap();
        let name = name.build();
        let mut builder = openssl::x509::X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_not_before(&openssl::asn1::Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&openssl::asn1::Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder
            .sign(&pkey, openssl::hash::MessageDigest::sha256())
            .unwrap();
        let cert = Certificate::from_der(builder.build().to_der().unwrap()).unwrap();

        for transport in [KeyTransport::RsaOaepMgf1p, KeyTransport::Rsa15] {
            let cek = random_bytes(16);
            let wrapped = wrap_key(&cert, &cek, transport).unwrap();
            assert_eq!(unwrap_key(&key, &wrapped, transport).unwrap(), cek);
        }
    }
}
