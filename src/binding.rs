//! HTTP-Redirect and HTTP-POST transport encodings for SAML messages.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::names::{BINDING_HTTP_POST, BINDING_HTTP_REDIRECT};

/// Maximum inflated size of a redirect-bound message (64 KB)
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Maximum encoded size of a redirect-bound message (128 KB)
const MAX_ENCODED_SIZE_REDIRECT: usize = 128 * 1024;

/// Maximum encoded size of a POST-bound message (512 KB)
const MAX_ENCODED_SIZE_POST: usize = 512 * 1024;

/// Raw DEFLATE, base64 and URL-encode a message for a redirect query string.
pub fn encode_redirect(xml: &str) -> Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| Error::Encoding(format!("Deflate encode failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::Encoding(format!("Deflate encode failed: {}", e)))?;
    Ok(urlencoding::encode(&STANDARD.encode(compressed)).into_owned())
}

/// Inverse of [`encode_redirect`]. Accepts the value with or without the
/// URL encoding already removed by the transport.
pub fn decode_redirect(value: &str) -> Result<String> {
    if value.len() > MAX_ENCODED_SIZE_REDIRECT {
        return Err(Error::Encoding(format!(
            "Encoded message exceeds maximum size ({} > {} bytes)",
            value.len(),
            MAX_ENCODED_SIZE_REDIRECT
        )));
    }

    let unescaped = if value.contains('%') {
        urlencoding::decode(value)
            .map_err(|e| Error::Encoding(format!("URL decode failed: {}", e)))?
            .into_owned()
    } else {
        value.to_string()
    };
    // form decoding turns '+' into ' '
    let base64_value = unescaped.replace(' ', "+");

    let compressed = STANDARD
        .decode(base64_value.trim())
        .map_err(|e| Error::Encoding(format!("Base64 decode failed: {}", e)))?;

    let mut inflated = Vec::new();
    DeflateDecoder::new(&compressed[..])
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| Error::Encoding(format!("Deflate decode failed: {}", e)))?;

    if inflated.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(Error::Encoding(
            "Decompressed message exceeds maximum size limit (64 KB)".to_string(),
        ));
    }

    String::from_utf8(inflated)
        .map_err(|e| Error::Encoding(format!("Message is not valid UTF-8: {}", e)))
}

/// Base64-encode a message for an HTML form field.
pub fn encode_post(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// Inverse of [`encode_post`]. Line breaks and other whitespace are ignored.
pub fn decode_post(value: &str) -> Result<String> {
    if value.len() > MAX_ENCODED_SIZE_POST {
        return Err(Error::Encoding(format!(
            "Encoded message exceeds maximum size ({} > {} bytes)",
            value.len(),
            MAX_ENCODED_SIZE_POST
        )));
    }

    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = STANDARD
        .decode(compact)
        .map_err(|e| Error::Encoding(format!("Base64 decode failed: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| Error::Encoding(format!("Invalid UTF-8: {}", e)))
}

/// Decode a message according to the binding URI it arrived with.
pub fn decode(binding: &str, value: &str) -> Result<String> {
    match binding {
        BINDING_HTTP_REDIRECT => decode_redirect(value),
        BINDING_HTTP_POST => decode_post(value),
        other => Err(Error::UnsupportedBinding(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_abc" Version="2.0" AssertionConsumerServiceURL="https://sp.example.org/acs?a=1&amp;b=2"><saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://sp.example.org</saml:Issuer></samlp:AuthnRequest>"#;

    #[test]
    fn test_redirect_round_trip() {
        let encoded = encode_redirect(REQUEST).unwrap();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert_eq!(decode_redirect(&encoded).unwrap(), REQUEST);
    }

    #[test]
    fn test_redirect_accepts_already_url_decoded_value() {
        let encoded = encode_redirect(REQUEST).unwrap();
        let url_decoded = urlencoding::decode(&encoded).unwrap().into_owned();
        assert_eq!(decode_redirect(&url_decoded).unwrap(), REQUEST);
        // a form decoder turns '+' into ' '
        let form_decoded = url_decoded.replace('+', " ");
        assert_eq!(decode_redirect(&form_decoded).unwrap(), REQUEST);
    }

    #[test]
    fn test_post_round_trip() {
        let encoded = encode_post(REQUEST);
        assert_eq!(decode_post(&encoded).unwrap(), REQUEST);
    }

    #[test]
    fn test_post_ignores_line_breaks() {
        let encoded = encode_post(REQUEST);
        let wrapped: String = encoded
            .as_bytes()
            .chunks(64)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert_eq!(decode_post(&wrapped).unwrap(), REQUEST);
    }

    #[test]
    fn test_invalid_input_is_an_encoding_error() {
        assert!(matches!(decode_post("***"), Err(Error::Encoding(_))));
        assert!(matches!(
            decode_redirect(&STANDARD.encode(b"not deflated")),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_oversized_input_is_rejected() {
        let huge = "A".repeat(MAX_ENCODED_SIZE_POST + 1);
        assert!(matches!(decode_post(&huge), Err(Error::Encoding(_))));
        assert!(matches!(decode_redirect(&huge), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_inflated_size_limit_is_inclusive() {
        let padded = |len: usize| format!("<a>{}</a>", "x".repeat(len - "<a></a>".len()));
        let at_limit = padded(MAX_DECOMPRESSED_SIZE as usize);
        assert_eq!(at_limit.len() as u64, MAX_DECOMPRESSED_SIZE);
        assert_eq!(
            decode_redirect(&encode_redirect(&at_limit).unwrap()).unwrap(),
            at_limit
        );

        let over = padded(MAX_DECOMPRESSED_SIZE as usize + 1);
        assert!(matches!(
            decode_redirect(&encode_redirect(&over).unwrap()),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_dispatches_on_binding() {
        assert_eq!(decode(BINDING_HTTP_POST, &encode_post(REQUEST)).unwrap(), REQUEST);
        assert_eq!(
            decode(BINDING_HTTP_REDIRECT, &encode_redirect(REQUEST).unwrap()).unwrap(),
            REQUEST
        );
        assert!(matches!(
            decode("urn:oasis:names:tc:SAML:2.0:bindings:SOAP", "x"),
            Err(Error::UnsupportedBinding(_))
        ));
    }
}
