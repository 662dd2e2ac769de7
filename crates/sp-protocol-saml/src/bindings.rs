//! SAML binding codecs.
//!
//! - **HTTP-Redirect** - raw DEFLATE (RFC 1951, no zlib wrapper), then
//!   base64, carried in query parameters.
//! - **HTTP-POST** - base64 of the raw XML, carried in form parameters.
//!
//! Decoders cap the inflated size so a hostile message cannot balloon in
//! memory.

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sp_core::{ErrorKind, SpError, SpResult};

const MAX_DECODED_LEN: u64 = 10 * 1024 * 1024;

/// SAML message type for binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// AuthnRequest / LogoutRequest message.
    Request,
    /// Response / LogoutResponse message.
    Response,
}

impl SamlMessageType {
    /// Returns the query/form parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes XML as a Redirect-binding parameter value (DEFLATE + base64,
    /// not yet percent-encoded).
    pub fn encode(xml: &str) -> SpResult<String> {
        let compressed = deflate_compress(xml.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
    }

    /// Encodes XML without compression, for peers that cannot inflate.
    #[must_use]
    pub fn encode_uncompressed(xml: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(xml)
    }

    /// Decodes a Redirect-binding parameter value back into XML.
    pub fn decode(value: &str) -> SpResult<String> {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("base64: {e}")))?;
        let xml_bytes = deflate_decompress(&compressed)?;
        String::from_utf8(xml_bytes)
            .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("not UTF-8: {e}")))
    }
}

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes XML as a POST-binding form value.
    #[must_use]
    pub fn encode(xml: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(xml)
    }

    /// Decodes a POST-binding form value back into XML. POST payloads are
    /// never deflated.
    pub fn decode(value: &str) -> SpResult<String> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("base64: {e}")))?;
        if decoded.len() as u64 > MAX_DECODED_LEN {
            return Err(SpError::new(ErrorKind::InvalidXml, "message too large"));
        }
        String::from_utf8(decoded)
            .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("not UTF-8: {e}")))
    }
}

/// Compresses data using raw DEFLATE (no zlib header).
fn deflate_compress(data: &[u8]) -> SpResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("deflate: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("deflate: {e}")))
}

/// Decompresses raw DEFLATE data with a size cap.
fn deflate_decompress(data: &[u8]) -> SpResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data).take(MAX_DECODED_LEN + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SpError::new(ErrorKind::InvalidXml, format!("inflate: {e}")))?;
    if decompressed.len() as u64 > MAX_DECODED_LEN {
        return Err(SpError::new(ErrorKind::InvalidXml, "message too large"));
    }
    Ok(decompressed)
}
