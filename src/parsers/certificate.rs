use anyhow::Result;
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Facts about the IdP signing certificate that end up in the run log.
#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_size_bits: u32,
    pub subject: String,
}

impl CertInfo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    pub fn is_not_yet_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.not_before
    }
}

pub fn parse_der(der: &[u8]) -> Result<CertInfo> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| anyhow::anyhow!("X509 parse error: {}", e))?;

    let not_before = cert.validity().not_before.to_datetime();
    let not_after = cert.validity().not_after.to_datetime();

    let key_size_bits = match cert.public_key().parsed() {
        Ok(PublicKey::RSA(rsa)) => rsa.key_size() as u32,
        _ => 0,
    };

    Ok(CertInfo {
        not_before: DateTime::from_timestamp(not_before.unix_timestamp(), 0).unwrap_or_default(),
        not_after: DateTime::from_timestamp(not_after.unix_timestamp(), 0).unwrap_or_default(),
        key_size_bits,
        subject: cert.subject().to_string(),
    })
}
