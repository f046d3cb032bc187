//! Enveloped XML-DSig over a single SAML element.

use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::{hash, MessageDigest};

use crate::error::{Error, Result};
use crate::idp::c14n::canonicalize;
use crate::idp::keys::KeyMaterial;
use crate::names::NS_XMLDSIG;

const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const ISSUER_END: &str = "</saml:Issuer>";

/// Sign `element_xml`, whose root carries `ID="{reference_id}"`, and return
/// it with a `ds:Signature` inserted right after its `saml:Issuer`.
///
/// The element must declare every namespace prefix it uses, since it is
/// canonicalized on its own.
pub fn sign_enveloped(element_xml: &str, reference_id: &str, key: &KeyMaterial) -> Result<String> {
    if !element_xml.contains(&format!("ID=\"{}\"", reference_id)) {
        return Err(Error::Signing(format!(
            "Element with ID '{}' not found",
            reference_id
        )));
    }
    let after_issuer = element_xml
        .find(ISSUER_END)
        .map(|pos| pos + ISSUER_END.len())
        .ok_or_else(|| Error::Signing("Cannot find Issuer in signed element".to_string()))?;

    let canonical = canonicalize(element_xml)?;
    let digest = hash(MessageDigest::sha256(), canonical.as_bytes())
        .map_err(|e| Error::Signing(format!("Digest failed: {}", e)))?;

    let signed_info = signed_info_xml(reference_id, &STANDARD.encode(digest));
    let signature = key.sign_sha256(canonicalize(&signed_info)?.as_bytes())?;

    let mut signature_xml = String::new();
    signature_xml.push_str("<ds:Signature xmlns:ds=\"");
    signature_xml.push_str(NS_XMLDSIG);
    signature_xml.push_str("\">");
    signature_xml.push_str(&signed_info);
    signature_xml.push_str("<ds:SignatureValue>");
    signature_xml.push_str(&STANDARD.encode(&signature));
    signature_xml.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>");
    signature_xml.push_str(&key.certificate_base64_der()?);
    signature_xml.push_str("</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>");

    let mut result = String::with_capacity(element_xml.len() + signature_xml.len());
    result.push_str(&element_xml[..after_issuer]);
    result.push_str(&signature_xml);
    result.push_str(&element_xml[after_issuer..]);
    Ok(result)
}

fn signed_info_xml(reference_id: &str, digest_b64: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<ds:SignedInfo xmlns:ds=\"");
    xml.push_str(NS_XMLDSIG);
    xml.push_str("\">");
    xml.push_str(&format!("<ds:CanonicalizationMethod Algorithm=\"{}\"/>", ALG_EXC_C14N));
    xml.push_str(&format!("<ds:SignatureMethod Algorithm=\"{}\"/>", ALG_RSA_SHA256));
    xml.push_str(&format!("<ds:Reference URI=\"#{}\">", reference_id));
    xml.push_str("<ds:Transforms>");
    xml.push_str(&format!("<ds:Transform Algorithm=\"{}\"/>", ALG_ENVELOPED));
    xml.push_str(&format!("<ds:Transform Algorithm=\"{}\"/>", ALG_EXC_C14N));
    xml.push_str("</ds:Transforms>");
    xml.push_str(&format!("<ds:DigestMethod Algorithm=\"{}\"/>", ALG_SHA256));
    xml.push_str("<ds:DigestValue>");
    xml.push_str(digest_b64);
    xml.push_str("</ds:DigestValue></ds:Reference></ds:SignedInfo>");
    xml
}
