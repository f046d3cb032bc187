//! Errors raised by the protocol engine and the message codec

use std::time::Duration;

use thiserror::Error;

/// Result type for protocol engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Input is not well-formed XML
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Binding transport encoding could not be decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The transport reported a binding the codec does not speak
    #[error("Unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// Private key or certificate could not be loaded or do not match
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Canonicalization, digest or signature computation failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The AuthnRequest carried no ID to correlate the Response with
    #[error("AuthnRequest has no ID attribute to correlate with")]
    MissingCorrelationId,

    /// Neither the request, the configuration nor the SP metadata names an ACS
    #[error("No AssertionConsumerService URL is known for the SP")]
    MissingAcs,

    /// Browser session or HTTP exchange with the SP failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// A blocking exchange did not complete in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::Signing(e.to_string())
    }
}
