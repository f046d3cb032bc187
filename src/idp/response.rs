//! Minimal SAML2Int Response with one bearer Assertion.
//!
//! A `Response<Assertion>` can be populated freely. [`Response::sign`]
//! consumes it and returns a `Response<SignedAssertion>`, which can only be
//! serialized, so nothing can change an Assertion after it was signed.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::SamlAttribute;
use crate::error::Result;
use crate::idp::keys::KeyMaterial;
use crate::idp::{signer, xml_escape};
use crate::names::{
    AC_PASSWORD_PROTECTED_TRANSPORT, CM_BEARER, NAMEID_FORMAT_TRANSIENT, NS_ASSERTION,
    NS_PROTOCOL, STATUS_SUCCESS,
};

/// Lifetime of the bearer confirmation and the Conditions window
const VALIDITY_MINUTES: i64 = 5;

/// Clock skew allowance applied to NotBefore
const SKEW_MINUTES: i64 = 2;

#[derive(Debug, Clone)]
pub struct Response<A> {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub destination: String,
    pub issuer: String,
    pub in_response_to: Option<String>,
    pub status_code: String,
    assertions: Vec<A>,
}

#[derive(Debug, Clone)]
pub struct Assertion {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub issuer: String,
    pub subject: Subject,
    pub conditions: Conditions,
    pub authn_statement: AuthnStatement,
    pub attributes: Vec<SamlAttribute>,
}

#[derive(Debug, Clone)]
pub struct Subject {
    pub name_id: NameId,
    pub subject_confirmations: Vec<SubjectConfirmation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameId {
    pub value: String,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct SubjectConfirmation {
    pub method: String,
    pub data: SubjectConfirmationData,
}

#[derive(Debug, Clone)]
pub struct SubjectConfirmationData {
    pub in_response_to: Option<String>,
    pub recipient: String,
    pub not_on_or_after: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Conditions {
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthnStatement {
    pub authn_instant: DateTime<Utc>,
    pub session_index: String,
    pub class_ref: String,
}

/// A serialized Assertion carrying its enveloped signature.
#[derive(Debug, Clone)]
pub struct SignedAssertion {
    pub id: String,
    xml: String,
}

/// An opaque NameID value, unique per call.
pub fn random_name_id() -> String {
    format!("_{}", Uuid::new_v4())
}

fn new_id() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl Response<Assertion> {
    /// Success Response with exactly one Assertion: a placeholder transient
    /// NameID, one bearer SubjectConfirmation for `destination`, Conditions
    /// restricted to `audience` when known, and an AuthnStatement.
    pub fn minimal(issuer: &str, destination: &str, audience: Option<&str>) -> Self {
        let now = Utc::now();
        let not_on_or_after = now + Duration::minutes(VALIDITY_MINUTES);

        let assertion = Assertion {
            id: new_id(),
            issue_instant: now,
            issuer: issuer.to_string(),
            subject: Subject {
                name_id: NameId {
                    value: random_name_id(),
                    format: NAMEID_FORMAT_TRANSIENT.to_string(),
                },
                subject_confirmations: vec![SubjectConfirmation {
                    method: CM_BEARER.to_string(),
                    data: SubjectConfirmationData {
                        in_response_to: None,
                        recipient: destination.to_string(),
                        not_on_or_after,
                    },
                }],
            },
            conditions: Conditions {
                not_before: now - Duration::minutes(SKEW_MINUTES),
                not_on_or_after,
                audience: audience.map(str::to_string),
            },
            authn_statement: AuthnStatement {
                authn_instant: now,
                session_index: new_id(),
                class_ref: AC_PASSWORD_PROTECTED_TRANSPORT.to_string(),
            },
            attributes: Vec::new(),
        };

        Response {
            id: new_id(),
            issue_instant: now,
            destination: destination.to_string(),
            issuer: issuer.to_string(),
            in_response_to: None,
            status_code: STATUS_SUCCESS.to_string(),
            assertions: vec![assertion],
        }
    }

    /// Set the NameID of every Assertion.
    pub fn set_name_id(&mut self, value: &str, format: &str) {
        for assertion in &mut self.assertions {
            assertion.set_name_id(value, format);
        }
    }

    /// Echo the request ID as InResponseTo on the Response and every
    /// SubjectConfirmationData, or clear it everywhere for unsolicited
    /// Responses.
    pub fn correlate(&mut self, request_id: Option<&str>) {
        self.in_response_to = request_id.map(str::to_string);
        for assertion in &mut self.assertions {
            for confirmation in &mut assertion.subject.subject_confirmations {
                confirmation.data.in_response_to = request_id.map(str::to_string);
            }
        }
    }

    pub fn add_attributes(&mut self, attributes: &[SamlAttribute]) {
        for assertion in &mut self.assertions {
            assertion.add_attributes(attributes);
        }
    }

    /// Sign every Assertion. This is the last step before serialization.
    pub fn sign(self, key: &KeyMaterial) -> Result<Response<SignedAssertion>> {
        let signed = self
            .assertions
            .iter()
            .map(|assertion| -> Result<SignedAssertion> {
                let xml = signer::sign_enveloped(&assertion.to_xml(), &assertion.id, key)?;
                Ok(SignedAssertion {
                    id: assertion.id.clone(),
                    xml,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(response_id = %self.id, assertions = signed.len(), "Signed Response");

        Ok(Response {
            id: self.id,
            issue_instant: self.issue_instant,
            destination: self.destination,
            issuer: self.issuer,
            in_response_to: self.in_response_to,
            status_code: self.status_code,
            assertions: signed,
        })
    }
}

impl<A> Response<A> {
    pub fn assertions(&self) -> &[A] {
        &self.assertions
    }
}

impl Response<SignedAssertion> {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str(&format!(
            "<samlp:Response xmlns:samlp=\"{}\" xmlns:saml=\"{}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\" Destination=\"{}\"",
            NS_PROTOCOL,
            NS_ASSERTION,
            xml_escape(&self.id),
            timestamp(&self.issue_instant),
            xml_escape(&self.destination),
        ));
        if let Some(id) = &self.in_response_to {
            xml.push_str(&format!(" InResponseTo=\"{}\"", xml_escape(id)));
        }
        xml.push('>');
        xml.push_str(&format!(
            "<saml:Issuer>{}</saml:Issuer>",
            xml_escape(&self.issuer)
        ));
        xml.push_str(&format!(
            "<samlp:Status><samlp:StatusCode Value=\"{}\"/></samlp:Status>",
            xml_escape(&self.status_code)
        ));
        for assertion in &self.assertions {
            xml.push_str(&assertion.xml);
        }
        xml.push_str("</samlp:Response>");
        xml
    }
}

impl Assertion {
    pub fn set_name_id(&mut self, value: &str, format: &str) {
        self.subject.name_id = NameId {
            value: value.to_string(),
            format: format.to_string(),
        };
    }

    /// Copy attributes verbatim: name, NameFormat and values.
    pub fn add_attributes(&mut self, attributes: &[SamlAttribute]) {
        self.attributes.extend(attributes.iter().cloned());
    }

    /// Serialized form. Declares its own namespace so that it can be
    /// canonicalized on its own.
    fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(&format!(
            "<saml:Assertion xmlns:saml=\"{}\" ID=\"{}\" Version=\"2.0\" IssueInstant=\"{}\">",
            NS_ASSERTION,
            xml_escape(&self.id),
            timestamp(&self.issue_instant),
        ));
        xml.push_str(&format!(
            "<saml:Issuer>{}</saml:Issuer>",
            xml_escape(&self.issuer)
        ));

        xml.push_str("<saml:Subject>");
        xml.push_str(&format!(
            "<saml:NameID Format=\"{}\">{}</saml:NameID>",
            xml_escape(&self.subject.name_id.format),
            xml_escape(&self.subject.name_id.value)
        ));
        for confirmation in &self.subject.subject_confirmations {
            xml.push_str(&format!(
                "<saml:SubjectConfirmation Method=\"{}\">",
                xml_escape(&confirmation.method)
            ));
            xml.push_str("<saml:SubjectConfirmationData");
            if let Some(id) = &confirmation.data.in_response_to {
                xml.push_str(&format!(" InResponseTo=\"{}\"", xml_escape(id)));
            }
            xml.push_str(&format!(
                " NotOnOrAfter=\"{}\" Recipient=\"{}\"/>",
                timestamp(&confirmation.data.not_on_or_after),
                xml_escape(&confirmation.data.recipient)
            ));
            xml.push_str("</saml:SubjectConfirmation>");
        }
        xml.push_str("</saml:Subject>");

        xml.push_str(&format!(
            "<saml:Conditions NotBefore=\"{}\" NotOnOrAfter=\"{}\">",
            timestamp(&self.conditions.not_before),
            timestamp(&self.conditions.not_on_or_after)
        ));
        if let Some(audience) = &self.conditions.audience {
            xml.push_str(&format!(
                "<saml:AudienceRestriction><saml:Audience>{}</saml:Audience></saml:AudienceRestriction>",
                xml_escape(audience)
            ));
        }
        xml.push_str("</saml:Conditions>");

        xml.push_str(&format!(
            "<saml:AuthnStatement AuthnInstant=\"{}\" SessionIndex=\"{}\"><saml:AuthnContext><saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>",
            timestamp(&self.authn_statement.authn_instant),
            xml_escape(&self.authn_statement.session_index),
            xml_escape(&self.authn_statement.class_ref)
        ));

        if !self.attributes.is_empty() {
            xml.push_str("<saml:AttributeStatement>");
            for attr in &self.attributes {
                xml.push_str(&format!("<saml:Attribute Name=\"{}\"", xml_escape(&attr.name)));
                if let Some(format) = &attr.name_format {
                    xml.push_str(&format!(" NameFormat=\"{}\"", xml_escape(format)));
                }
                xml.push('>');
                for value in &attr.values {
                    xml.push_str(&format!(
                        "<saml:AttributeValue>{}</saml:AttributeValue>",
                        xml_escape(value)
                    ));
                }
                xml.push_str("</saml:Attribute>");
            }
            xml.push_str("</saml:AttributeStatement>");
        }

        xml.push_str("</saml:Assertion>");
        xml
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize;
    use crate::names::{NAMEFORMAT_URI, NAMEID_FORMAT_PERSISTENT, NS_XMLDSIG};
    use crate::parsers::xml::{self, Document};

    fn key() -> KeyMaterial {
        KeyMaterial::generate_self_signed(initialize(), "response-test").unwrap()
    }

    fn render(response: Response<Assertion>) -> Document {
        xml::parse(&response.sign(&key()).unwrap().to_xml()).unwrap()
    }

    fn in_response_to_values(doc: &Document) -> (Option<String>, Vec<Option<String>>) {
        let on_response = doc.root.attr("InResponseTo").map(str::to_string);
        let on_confirmations = doc
            .find_all(NS_ASSERTION, "SubjectConfirmationData")
            .map(|e| e.attr("InResponseTo").map(str::to_string))
            .collect();
        (on_response, on_confirmations)
    }

    #[test]
    fn test_minimal_structure() {
        let response = Response::minimal(
            "http://localhost:8080/sso",
            "https://sp.example.org/acs",
            Some("https://sp.example.org/shibboleth"),
        );
        let doc = render(response);

        assert!(doc.root.is(NS_PROTOCOL, "Response"));
        assert_eq!(doc.root.attr("Destination"), Some("https://sp.example.org/acs"));
        assert_eq!(doc.find_all(NS_ASSERTION, "Assertion").count(), 1);
        assert_eq!(doc.find_all(NS_ASSERTION, "Subject").count(), 1);

        let confirmation = doc.find_all(NS_ASSERTION, "SubjectConfirmation").next().unwrap();
        assert_eq!(confirmation.attr("Method"), Some(CM_BEARER));
        let data = doc.find_all(NS_ASSERTION, "SubjectConfirmationData").next().unwrap();
        assert_eq!(data.attr("Recipient"), Some("https://sp.example.org/acs"));

        let audience = doc.find_all(NS_ASSERTION, "Audience").next().unwrap();
        assert_eq!(audience.text(), "https://sp.example.org/shibboleth");

        let status = doc.find_all(NS_PROTOCOL, "StatusCode").next().unwrap();
        assert_eq!(status.attr("Value"), Some(STATUS_SUCCESS));
    }

    #[test]
    fn test_sp_initiated_correlation() {
        let mut response = Response::minimal("idp", "https://sp.example.org/acs", None);
        response.correlate(Some("_request-42"));
        let doc = render(response);

        let (on_response, on_confirmations) = in_response_to_values(&doc);
        assert_eq!(on_response.as_deref(), Some("_request-42"));
        assert!(!on_confirmations.is_empty());
        assert!(on_confirmations
            .iter()
            .all(|v| v.as_deref() == Some("_request-42")));
    }

    #[test]
    fn test_unsolicited_has_no_in_response_to() {
        let mut response = Response::minimal("idp", "https://sp.example.org/acs", None);
        response.correlate(Some("_stale"));
        response.correlate(None);
        let doc = render(response);

        let (on_response, on_confirmations) = in_response_to_values(&doc);
        assert_eq!(on_response, None);
        assert!(on_confirmations.iter().all(Option::is_none));
        assert!(doc
            .elements()
            .all(|e| e.attr("InResponseTo").is_none()));
    }

    #[test]
    fn test_name_id_and_attributes() {
        let mut response = Response::minimal("idp", "https://sp.example.org/acs", None);
        let value = random_name_id();
        response.set_name_id(&value, NAMEID_FORMAT_PERSISTENT);
        response.add_attributes(&[
            SamlAttribute {
                name: "urn:oid:0.9.2342.19200300.100.1.3".to_string(),
                name_format: Some(NAMEFORMAT_URI.to_string()),
                values: vec!["alice@example.org".to_string(), "a&b".to_string()],
            },
            SamlAttribute {
                name: "displayName".to_string(),
                name_format: None,
                values: Vec::new(),
            },
        ]);
        let doc = render(response);

        let name_id = doc.find_all(NS_ASSERTION, "NameID").next().unwrap();
        assert_eq!(name_id.text(), value);
        assert_eq!(name_id.attr("Format"), Some(NAMEID_FORMAT_PERSISTENT));

        let attrs: Vec<_> = doc.find_all(NS_ASSERTION, "Attribute").collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].attr("NameFormat"), Some(NAMEFORMAT_URI));
        let values: Vec<_> = attrs[0].child_elements().map(|e| e.text()).collect();
        assert_eq!(values, vec!["alice@example.org", "a&b"]);
        assert_eq!(attrs[1].attr("NameFormat"), None);
    }

    #[test]
    fn test_signature_inside_assertion() {
        let response = Response::minimal("idp", "https://sp.example.org/acs", None);
        let assertion_id = response.assertions()[0].id.clone();
        let doc = render(response);

        let assertion = doc.find_all(NS_ASSERTION, "Assertion").next().unwrap();
        let children: Vec<_> = assertion.child_elements().collect();
        assert!(children[0].is(NS_ASSERTION, "Issuer"));
        assert!(children[1].is(NS_XMLDSIG, "Signature"));
        let reference = doc.find_all(NS_XMLDSIG, "Reference").next().unwrap();
        assert_eq!(reference.attr("URI"), Some(format!("#{}", assertion_id).as_str()));
    }

    #[test]
    fn test_name_ids_are_unique() {
        assert_ne!(random_name_id(), random_name_id());
        assert!(random_name_id().starts_with('_'));
    }
}
