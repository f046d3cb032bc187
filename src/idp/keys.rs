//! IdP signing key and certificate.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use crate::error::{Error, Result};
use crate::parsers::certificate::{self, CertInfo};
use crate::CryptoReady;

/// Validity of generated certificates, in days
const GENERATED_CERT_DAYS: u32 = 365;

/// Private key plus certificate, loaded once per run and shared read-only.
pub struct KeyMaterial {
    private_key: PKey<Private>,
    certificate: X509,
    info: CertInfo,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("subject", &self.info.subject)
            .field("not_after", &self.info.not_after)
            .finish_non_exhaustive()
    }
}

impl KeyMaterial {
    pub fn load(ready: CryptoReady, cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            Error::KeyMaterial(format!(
                "Failed to read certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            Error::KeyMaterial(format!("Failed to read key file {}: {}", key_path.display(), e))
        })?;
        Self::from_pem(ready, &cert_pem, &key_pem)
    }

    pub fn from_pem(_ready: CryptoReady, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificate = X509::from_pem(cert_pem)
            .map_err(|e| Error::KeyMaterial(format!("Invalid certificate PEM: {}", e)))?;
        let private_key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| Error::KeyMaterial(format!("Invalid private key PEM: {}", e)))?;
        Self::from_parts(private_key, certificate)
    }

    /// Ephemeral self-signed RSA-2048 pair for runs without configured keys.
    pub fn generate_self_signed(_ready: CryptoReady, common_name: &str) -> Result<Self> {
        let rsa = Rsa::generate(2048)
            .map_err(|e| Error::KeyMaterial(format!("RSA key generation failed: {}", e)))?;
        let private_key = PKey::from_rsa(rsa)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)
            .map_err(|e| Error::KeyMaterial(format!("Invalid common name: {}", e)))?;
        let name = name.build();

        let mut serial = BigNum::new()?;
        serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

        let mut builder = X509Builder::new()?;
        builder.set_version(2)?;
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&private_key)?;
        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(GENERATED_CERT_DAYS)?;
        builder.set_not_after(&not_after)?;
        builder.sign(&private_key, MessageDigest::sha256())?;

        tracing::info!(common_name, "Generated ephemeral IdP signing certificate");
        Self::from_parts(private_key, builder.build())
    }

    fn from_parts(private_key: PKey<Private>, certificate: X509) -> Result<Self> {
        // Signatures are always labelled rsa-sha256
        if private_key.rsa().is_err() {
            return Err(Error::KeyMaterial(
                "The IdP signing key must be an RSA key".to_string(),
            ));
        }
        let public_key = certificate
            .public_key()
            .map_err(|e| Error::KeyMaterial(format!("Certificate has no usable public key: {}", e)))?;
        if !public_key.public_eq(&private_key) {
            return Err(Error::KeyMaterial(
                "Private key does not match the certificate".to_string(),
            ));
        }

        let der = certificate.to_der()?;
        let info =
            certificate::parse_der(&der).map_err(|e| Error::KeyMaterial(e.to_string()))?;

        let now = Utc::now();
        if info.is_expired_at(now) {
            tracing::warn!(
                subject = %info.subject,
                not_after = %info.not_after,
                "IdP signing certificate has expired"
            );
        } else if info.is_not_yet_valid_at(now) {
            tracing::warn!(
                subject = %info.subject,
                not_before = %info.not_before,
                "IdP signing certificate is not yet valid"
            );
        } else {
            tracing::info!(
                subject = %info.subject,
                not_after = %info.not_after,
                key_size = info.key_size_bits,
                "Using IdP signing certificate"
            );
        }

        Ok(Self {
            private_key,
            certificate,
            info,
        })
    }

    pub fn info(&self) -> &CertInfo {
        &self.info
    }

    pub fn sign_sha256(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    pub fn verify_sha256(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let public_key = self.certificate.public_key()?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public_key)?;
        verifier.update(data)?;
        Ok(verifier.verify(signature)?)
    }

    /// Base64 DER of the certificate, as carried in `ds:X509Certificate`.
    pub fn certificate_base64_der(&self) -> Result<String> {
        Ok(STANDARD.encode(self.certificate.to_der()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;

    fn pem_pair(key: &KeyMaterial) -> (Vec<u8>, Vec<u8>) {
        (
            key.certificate.to_pem().unwrap(),
            key.private_key.private_key_to_pem_pkcs8().unwrap(),
        )
    }

    #[test]
    fn test_generated_pair_signs_and_verifies() {
        let key = KeyMaterial::generate_self_signed(initialize(), "spconform-test").unwrap();
        let signature = key.sign_sha256(b"payload").unwrap();
        assert!(key.verify_sha256(b"payload", &signature).unwrap());
        assert!(!key.verify_sha256(b"tampered", &signature).unwrap());
        assert!(key.info().subject.contains("spconform-test"));
        assert_eq!(key.info().key_size_bits, 2048);
    }

    #[test]
    fn test_load_from_files() {
        let generated = KeyMaterial::generate_self_signed(initialize(), "file-test").unwrap();
        let (cert_pem, key_pem) = pem_pair(&generated);
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("idp.crt");
        let key_path = dir.path().join("idp.key");
        std::fs::write(&cert_path, cert_pem).unwrap();
        std::fs::write(&key_path, key_pem).unwrap();

        let loaded = KeyMaterial::load(initialize(), &cert_path, &key_path).unwrap();
        assert_eq!(
            loaded.certificate_base64_der().unwrap(),
            generated.certificate_base64_der().unwrap()
        );
    }

    #[test]
    fn test_mismatched_pair_is_rejected() {
        let a = KeyMaterial::generate_self_signed(initialize(), "a").unwrap();
        let b = KeyMaterial::generate_self_signed(initialize(), "b").unwrap();
        let (cert_a, _) = pem_pair(&a);
        let (_, key_b) = pem_pair(&b);
        let err = KeyMaterial::from_pem(initialize(), &cert_a, &key_b).unwrap_err();
        assert!(matches!(err, Error::KeyMaterial(_)));
    }

    #[test]
    fn test_ec_key_is_rejected() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let private_key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "ec-test").unwrap();
        let name = name.build();
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&private_key).unwrap();
        let not_before = Asn1Time::days_from_now(0).unwrap();
        builder.set_not_before(&not_before).unwrap();
        let not_after = Asn1Time::days_from_now(1).unwrap();
        builder.set_not_after(&not_after).unwrap();
        builder.sign(&private_key, MessageDigest::sha256()).unwrap();
        let certificate = builder.build();

        let err = KeyMaterial::from_pem(
            initialize(),
            &certificate.to_pem().unwrap(),
            &private_key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::KeyMaterial(ref m) if m.contains("RSA")));
    }

    #[test]
    fn test_missing_files_are_key_material_errors() {
        let err = KeyMaterial::load(
            initialize(),
            Path::new("/nonexistent/idp.crt"),
            Path::new("/nonexistent/idp.key"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::KeyMaterial(_)));
    }
}
