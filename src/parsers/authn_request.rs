use crate::error::{Error, Result};
use crate::names::{NS_ASSERTION, NS_PROTOCOL};
use crate::parsers::xml::{self, Document};

/// A decoded `samlp:AuthnRequest`, populated once at decode time.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    pub id: Option<String>,
    pub issuer: Option<String>,
    pub destination: Option<String>,
    pub assertion_consumer_service_url: Option<String>,
    pub protocol_binding: Option<String>,
    pub name_id_policy_format: Option<String>,
    /// Number of `saml:Subject` elements anywhere in the request.
    pub subject_count: usize,
    pub xml: String,
}

impl AuthnRequest {
    /// Parse request XML. Only well-formedness and the root element are
    /// enforced here; everything else is left for the request checks.
    pub fn parse(xml: &str) -> Result<AuthnRequest> {
        let document = xml::parse(xml)?;
        Self::from_document(&document, xml)
    }

    fn from_document(document: &Document, xml: &str) -> Result<AuthnRequest> {
        let root = &document.root;
        if !root.is(NS_PROTOCOL, "AuthnRequest") {
            return Err(Error::MalformedDocument(format!(
                "expected a samlp:AuthnRequest, found <{}>",
                root.name
            )));
        }

        let issuer = root
            .child_elements()
            .find(|e| e.is(NS_ASSERTION, "Issuer"))
            .map(|e| e.text().trim().to_string());

        let name_id_policy_format = root
            .child_elements()
            .find(|e| e.is(NS_PROTOCOL, "NameIDPolicy"))
            .and_then(|e| e.attr("Format"))
            .map(str::to_string);

        Ok(AuthnRequest {
            id: root.attr("ID").map(str::to_string),
            issuer,
            destination: root.attr("Destination").map(str::to_string),
            assertion_consumer_service_url: root
                .attr("AssertionConsumerServiceURL")
                .map(str::to_string),
            protocol_binding: root.attr("ProtocolBinding").map(str::to_string),
            name_id_policy_format,
            subject_count: document.find_all(NS_ASSERTION, "Subject").count(),
            xml: xml.to_string(),
        })
    }

    /// The ID a Response must carry as InResponseTo.
    pub fn correlation_id(&self) -> Result<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingCorrelationId)
    }
}
