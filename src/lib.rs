//! SAML2Int conformance tester.
//!
//! The crate plays the Identity Provider towards a SAML 2.0 Service Provider:
//! it publishes IdP metadata, answers the SP's AuthnRequests with signed
//! Responses, sends unsolicited Responses, and grades the SP's metadata,
//! requests, login behavior and configuration against the SAML2Int rules.

pub mod binding;
pub mod checks;
pub mod config;
pub mod error;
pub mod filter;
pub mod idp;
pub mod login;
pub mod names;
pub mod output;
pub mod parsers;
pub mod result;
pub mod runner;
pub mod transport;

/// Proof that the crypto backend has been initialized.
///
/// Constructors of key material take this token so that key handling can not
/// happen before [`initialize`] ran.
#[derive(Debug, Clone, Copy)]
pub struct CryptoReady(());

/// One-time library setup. Safe to call more than once.
pub fn initialize() -> CryptoReady {
    openssl::init();
    CryptoReady(())
}
