use std::path::Path;

use anyhow::{Context, Result};

use crate::names::{NS_ASSERTION, NS_METADATA, NS_XML};
use crate::parsers::xml::{self, Document, Element};

/// SP metadata document with the views the metadata checks work on.
///
/// All views are flattened over the whole document in document order, the
/// way the profile rules are phrased ("the metadata contains ...").
#[derive(Debug, Clone)]
pub struct SpMetadata {
    pub document: Document,
    pub entity_descriptors: Vec<EntityDescriptor>,
    pub sp_sso_descriptors: Vec<SpSsoDescriptor>,
    pub key_descriptors: Vec<KeyDescriptor>,
    pub assertion_consumer_services: Vec<AssertionConsumerService>,
    pub attribute_consuming_services: usize,
    pub service_names: Vec<ServiceName>,
    pub name_id_formats: Vec<String>,
    pub contact_persons: Vec<ContactPerson>,
    pub attributes: Vec<MetadataAttribute>,
}

/// Any element named `EntityDescriptor`, whatever namespace it is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub namespace: Option<String>,
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpSsoDescriptor {
    pub has_key_descriptor: bool,
    pub has_assertion_consumer_service: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// `None` when the attribute is missing, which makes the key dual-purpose.
    pub use_attr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionConsumerService {
    pub binding: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName {
    pub lang: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPerson {
    pub contact_type: Option<String>,
    pub email_addresses: Vec<String>,
}

/// `md:RequestedAttribute` or `saml:Attribute` found in the metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataAttribute {
    pub name: Option<String>,
    pub name_format: Option<String>,
}

pub fn parse_file(path: &Path) -> Result<SpMetadata> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read SP metadata {}", path.display()))?;
    let document = xml::parse_bytes(&content)
        .with_context(|| format!("Failed to parse SP metadata {}", path.display()))?;
    Ok(SpMetadata::from_document(document))
}

impl SpMetadata {
    pub fn parse(input: &str) -> crate::error::Result<SpMetadata> {
        Ok(Self::from_document(xml::parse(input)?))
    }

    pub fn from_document(document: Document) -> SpMetadata {
        let mut entity_descriptors = Vec::new();
        let mut sp_sso_descriptors = Vec::new();
        let mut key_descriptors = Vec::new();
        let mut assertion_consumer_services = Vec::new();
        let mut attribute_consuming_services = 0;
        let mut service_names = Vec::new();
        let mut name_id_formats = Vec::new();
        let mut contact_persons = Vec::new();
        let mut attributes = Vec::new();

        for element in document.elements() {
            if element.name == "EntityDescriptor" {
                entity_descriptors.push(EntityDescriptor {
                    namespace: element.namespace.clone(),
                    entity_id: element.attr("entityID").map(str::to_string),
                });
                continue;
            }

            if element.is(NS_ASSERTION, "Attribute") {
                attributes.push(attribute_of(element));
                continue;
            }

            if element.namespace.as_deref() != Some(NS_METADATA) {
                continue;
            }

            match element.name.as_str() {
                "SPSSODescriptor" => sp_sso_descriptors.push(SpSsoDescriptor {
                    has_key_descriptor: has_md_child(element, "KeyDescriptor"),
                    has_assertion_consumer_service: has_md_child(
                        element,
                        "AssertionConsumerService",
                    ),
                }),
                "KeyDescriptor" => key_descriptors.push(KeyDescriptor {
                    use_attr: element.attr("use").map(str::to_string),
                }),
                "AssertionConsumerService" => {
                    assertion_consumer_services.push(AssertionConsumerService {
                        binding: element.attr("Binding").map(str::to_string),
                        location: element.attr("Location").map(str::to_string),
                    })
                }
                "AttributeConsumingService" => attribute_consuming_services += 1,
                "ServiceName" => service_names.push(ServiceName {
                    lang: element.attr_ns(NS_XML, "lang").map(str::to_string),
                    value: element.text().trim().to_string(),
                }),
                "NameIDFormat" => name_id_formats.push(element.text().trim().to_string()),
                "ContactPerson" => contact_persons.push(ContactPerson {
                    contact_type: element.attr("contactType").map(str::to_string),
                    email_addresses: element
                        .child_elements()
                        .filter(|c| c.is(NS_METADATA, "EmailAddress"))
                        .map(|c| c.text().trim().to_string())
                        .collect(),
                }),
                "RequestedAttribute" => attributes.push(attribute_of(element)),
                _ => {}
            }
        }

        SpMetadata {
            document,
            entity_descriptors,
            sp_sso_descriptors,
            key_descriptors,
            assertion_consumer_services,
            attribute_consuming_services,
            service_names,
            name_id_formats,
            contact_persons,
            attributes,
        }
    }

    /// entityID of the first EntityDescriptor.
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_descriptors
            .first()
            .and_then(|ed| ed.entity_id.as_deref())
    }

    /// Default ACS: the one flagged `isDefault="true"`, else the first one.
    pub fn default_acs_location(&self) -> Option<String> {
        let flagged = self
            .document
            .find_all(NS_METADATA, "AssertionConsumerService")
            .find(|e| e.attr("isDefault") == Some("true"))
            .and_then(|e| e.attr("Location"));
        flagged
            .map(str::to_string)
            .or_else(|| {
                self.assertion_consumer_services
                    .iter()
                    .find_map(|acs| acs.location.clone())
            })
    }
}

fn has_md_child(element: &Element, name: &str) -> bool {
    element.child_elements().any(|c| c.is(NS_METADATA, name))
}

fn attribute_of(element: &Element) -> MetadataAttribute {
    MetadataAttribute {
        name: element.attr("Name").map(str::to_string),
        name_format: element.attr("NameFormat").map(str::to_string),
    }
}
