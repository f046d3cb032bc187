use std::sync::Arc;
use std::time::Duration;

use ureq::Agent;
use url::Url;

use crate::checks::MetadataCheck;
use crate::error::{Error, Result};
use crate::names::{
    CONTACT_TYPE_SUPPORT, CONTACT_TYPE_TECHNICAL, KEY_USE_ENCRYPTION, LANG_ENGLISH,
    NAMEFORMAT_URI, NAMEID_FORMAT_PERSISTENT, NAMEID_FORMAT_TRANSIENT, NS_METADATA,
};
use crate::parsers::sp_metadata::SpMetadata;
use crate::parsers::xml;
use crate::result::CheckResult;

const NO_METADATA: &str = "there was no metadata available";

/// Retrieves the document published at a URL.
pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP GET with a global timeout. Non-2xx statuses are errors.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl MetadataFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let config = Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent = Agent::new_with_config(config);
        agent
            .get(url)
            .call()
            .map_err(|e| Error::Transport(format!("Failed to fetch {}: {}", url, e)))?
            .into_body()
            .read_to_string()
            .map_err(|e| Error::Transport(format!("Failed to read {}: {}", url, e)))
    }
}

/// MD-001
pub struct MetadataAvailable;

impl MetadataCheck for MetadataAvailable {
    fn code(&self) -> &'static str {
        "MD-001"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata is available (MUST requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::error("The Service Provider's metadata was not available");
        };
        if let Some(failure) = single_entity(md) {
            return failure;
        }
        if md.entity_descriptors[0].namespace.as_deref() == Some(NS_METADATA) {
            CheckResult::ok("The Service Provider's metadata is available")
        } else {
            CheckResult::error("The Service Provider's metadata did not use the SAML Metadata namespace")
        }
    }
}

/// CRITICAL unless the document describes exactly one entity.
fn single_entity(md: &SpMetadata) -> Option<CheckResult> {
    match md.entity_descriptors.len() {
        0 => Some(CheckResult::critical(
            "The provided metadata contained no metadata for a SAML entity",
        )),
        1 => None,
        _ => Some(CheckResult::critical(
            "The provided metadata contained metadata for multiple SAML entities",
        )),
    }
}

/// MD-002
pub struct RequiredElements;

impl MetadataCheck for RequiredElements {
    fn code(&self) -> &'static str {
        "MD-002"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains all minimally required elements (MUST requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.sp_sso_descriptors.is_empty() {
            return CheckResult::error(
                "The Service Provider's metadata did not contain an SPSSODescriptor",
            );
        }
        if md
            .sp_sso_descriptors
            .iter()
            .any(|d| d.has_key_descriptor && d.has_assertion_consumer_service)
        {
            CheckResult::ok("The Service Provider's metadata contains all minimally required elements")
        } else {
            CheckResult::error("None of the SPSSODescriptor elements in the Service Provider's metadata contained both the KeyDescriptor and the AssertionConsumerService element")
        }
    }
}

/// MD-003: the entityID, used as a URL, serves the same metadata.
pub struct WellKnownLocation {
    fetcher: Arc<dyn MetadataFetcher>,
}

impl WellKnownLocation {
    pub fn new(fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self { fetcher }
    }
}

impl MetadataCheck for WellKnownLocation {
    fn code(&self) -> &'static str {
        "MD-003"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata is available at the Well-Known Location (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        const NOT_FOUND: &str = "The metadata was not found at the Well-Known Location (the URL represented by the Entity ID)";

        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if let Some(failure) = single_entity(md) {
            return failure;
        }
        let Some(entity_id) = md.entity_id() else {
            return CheckResult::warning(
                "The Service Provider's metadata does not contain an entityID",
            );
        };

        let fetched = match self.fetcher.fetch(entity_id).and_then(|body| xml::parse(&body)) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::info!(url = entity_id, error = %e, "Well-known location not usable");
                return CheckResult::warning(NOT_FOUND);
            }
        };

        if md.document.is_equivalent(&fetched) {
            CheckResult::ok("The Service Provider's metadata is available at the Well-Known Location")
        } else {
            tracing::info!(url = entity_id, "Well-known location serves different metadata");
            CheckResult::warning(NOT_FOUND)
        }
    }
}

/// MD-004
pub struct NameIdFormatPresent;

impl MetadataCheck for NameIdFormatPresent {
    fn code(&self) -> &'static str {
        "MD-004"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains at least one NameIDFormat element (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.name_id_formats.is_empty() {
            CheckResult::warning("The Service Provider's metadata does not contain a NameIDFormat element")
        } else {
            CheckResult::ok("The Service Provider's metadata contains a NameIDFormat element")
        }
    }
}

/// MD-005
pub struct AttributeNameFormat;

impl MetadataCheck for AttributeNameFormat {
    fn code(&self) -> &'static str {
        "MD-005"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains only attributes with NameFormat value of 'urn:oasis:names:tc:SAML:2.0:attrname-format:uri' (MUST requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.attributes.is_empty() {
            return CheckResult::ok(
                "The Service Provider's metadata contains no attributes, so the requirement does not apply",
            );
        }
        if md
            .attributes
            .iter()
            .all(|a| a.name_format.as_deref() == Some(NAMEFORMAT_URI))
        {
            CheckResult::ok(format!(
                "The Service Provider's metadata contains only attributes with NameFormat value of '{}'",
                NAMEFORMAT_URI
            ))
        } else {
            CheckResult::warning(format!(
                "The Service Provider's metadata contains an attribute with a NameFormat value other than '{}'",
                NAMEFORMAT_URI
            ))
        }
    }
}

/// MD-006
pub struct AttributeConsumingService;

impl MetadataCheck for AttributeConsumingService {
    fn code(&self) -> &'static str {
        "MD-006"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains at least one AttributeConsumingService element (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.attribute_consuming_services >= 1 {
            CheckResult::ok("The Service Provider's metadata contains an AttributeConsumingService element")
        } else {
            CheckResult::warning("The Service Provider's metadata does not contain an AttributeConsumingService element")
        }
    }
}

/// MD-007
pub struct ServiceNamePresent;

impl MetadataCheck for ServiceNamePresent {
    fn code(&self) -> &'static str {
        "MD-007"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains at least one ServiceName element (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.service_names.is_empty() {
            CheckResult::warning("The Service Provider's metadata does not contain any ServiceName elements")
        } else {
            CheckResult::ok("The Service Provider's metadata contains at least one ServiceName element")
        }
    }
}

/// MD-008
pub struct EnglishServiceName;

impl MetadataCheck for EnglishServiceName {
    fn code(&self) -> &'static str {
        "MD-008"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains at least one ServiceName with language set to English (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.service_names.is_empty() {
            return CheckResult::warning(
                "The Service Provider's metadata does not contain any ServiceName elements",
            );
        }
        let english = md.service_names.iter().any(|name| {
            name.lang
                .as_deref()
                .is_some_and(|lang| lang.to_ascii_lowercase().contains(LANG_ENGLISH))
        });
        if english {
            CheckResult::ok("The Service Provider's metadata contains at least one ServiceName with language set to English")
        } else {
            CheckResult::warning("The Service Provider's metadata does not contain any ServiceName elements with language set to English")
        }
    }
}

const MALFORMED_ACS: &str = "The Service Provider's metadata contains at least one malformed Assertion Consumer Service Locations URL";
const NO_ACS: &str =
    "The Service Provider's metadata does not contain any Assertion Consumer Service elements";

enum AcsSecurity {
    NoEndpoints,
    Malformed,
    Secure { https: usize, total: usize },
}

/// How many ACS endpoints use https. A missing Location counts as malformed.
fn acs_security(md: &SpMetadata) -> AcsSecurity {
    let total = md.assertion_consumer_services.len();
    if total == 0 {
        return AcsSecurity::NoEndpoints;
    }
    let mut https = 0;
    for acs in &md.assertion_consumer_services {
        match acs.location.as_deref().map(Url::parse) {
            Some(Ok(url)) if url.scheme() == "https" => https += 1,
            Some(Ok(_)) => {}
            _ => return AcsSecurity::Malformed,
        }
    }
    AcsSecurity::Secure { https, total }
}

/// MD-009
pub struct AcsUsesTls;

impl MetadataCheck for AcsUsesTls {
    fn code(&self) -> &'static str {
        "MD-009"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider uses TLS/SSL for its Assertion Consumer Service endpoints (RECOMMENDATION)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        match acs_security(md) {
            AcsSecurity::NoEndpoints => CheckResult::warning(NO_ACS),
            AcsSecurity::Malformed => CheckResult::critical(MALFORMED_ACS),
            AcsSecurity::Secure { https, total } if https == total => CheckResult::ok(
                "The Service Provider uses TLS/SSL for all its Assertion Consumer Service endpoints",
            ),
            AcsSecurity::Secure { https: 0, .. } => CheckResult::warning(
                "The Service Provider neglects using TLS/SSL on all of its Assertion Consumer Service endpoints",
            ),
            AcsSecurity::Secure { .. } => CheckResult::warning(
                "The Service Provider neglects using TLS/SSL on some of its Assertion Consumer Service endpoints",
            ),
        }
    }
}

/// MD-010: an encryption key is only needed when some ACS lacks TLS.
pub struct EncryptionKey;

impl MetadataCheck for EncryptionKey {
    fn code(&self) -> &'static str {
        "MD-010"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains an encryption key when not using TLS/SSL for its Assertion Consumer Service endpoints (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        const HAS_KEY: &str = "The Service Provider's metadata contains an encryption key";

        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        match acs_security(md) {
            AcsSecurity::NoEndpoints => return CheckResult::warning(NO_ACS),
            AcsSecurity::Malformed => return CheckResult::critical(MALFORMED_ACS),
            AcsSecurity::Secure { https, total } if https == total => {
                return CheckResult::ok("The Service Provider uses TLS/SSL on all of its Assertion Consumer Service endpoints, so this requirement does not apply");
            }
            AcsSecurity::Secure { .. } => {}
        }

        if md.key_descriptors.is_empty() {
            return CheckResult::warning("The Service Provider's metadata does not contain any keys and neglects to use TLS/SSL for all of its Assertion Consumer Service endpoints");
        }
        for kd in &md.key_descriptors {
            match kd.use_attr.as_deref() {
                // without `use` the key serves signing and encryption
                None => return CheckResult::ok(HAS_KEY),
                Some("") => {
                    return CheckResult::critical("The Service Provider's metadata contains an empty 'use' attribute, which makes the metadata invalid");
                }
                Some(KEY_USE_ENCRYPTION) => return CheckResult::ok(HAS_KEY),
                Some(_) => {}
            }
        }
        CheckResult::warning("The Service Provider's metadata does not contain an encryption key and neglects to use TLS/SSL for all of its Assertion Consumer Service endpoints")
    }
}

/// MD-011
pub struct ContactPersons;

impl MetadataCheck for ContactPersons {
    fn code(&self) -> &'static str {
        "MD-011"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains contact information for a support and a technical contact (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        match md.contact_persons.len() {
            0 => return CheckResult::warning("The Service Provider's metadata contains no Contact Persons"),
            1 => {
                return CheckResult::warning(
                    "The Service Provider's metadata contains only one Contact Person",
                )
            }
            _ => {}
        }

        let has = |wanted: &str| {
            md.contact_persons
                .iter()
                .any(|c| c.contact_type.as_deref() == Some(wanted))
        };
        match (has(CONTACT_TYPE_SUPPORT), has(CONTACT_TYPE_TECHNICAL)) {
            (true, true) => CheckResult::ok("The Service Provider's metadata contains contact information for both a support and a technical contact"),
            (true, false) => CheckResult::warning("The Service Provider's metadata contains only support Contact Persons"),
            (false, true) => CheckResult::warning("The Service Provider's metadata contains only technical Contact Persons"),
            (false, false) => CheckResult::warning("The Service Provider's metadata contains no support or technical Contact Persons"),
        }
    }
}

/// MD-012
pub struct ContactEmail;

impl MetadataCheck for ContactEmail {
    fn code(&self) -> &'static str {
        "MD-012"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains EmailAddress elements for all its ContactPerson elements (SHOULD requirement)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        let total = md.contact_persons.len();
        if total == 0 {
            return CheckResult::warning("The Service Provider's metadata contains no Contact Persons");
        }
        let with_email = md
            .contact_persons
            .iter()
            .filter(|c| !c.email_addresses.is_empty())
            .count();
        if with_email == total {
            CheckResult::ok("The Service Provider's metadata contains EmailAddress elements for all its ContactPerson elements")
        } else if with_email == 0 {
            CheckResult::warning("The Service Provider's metadata contains no EmailAddress elements for any of its ContactPerson elements")
        } else {
            CheckResult::warning("The Service Provider's metadata contains EmailAddress elements for some, but not all, of its ContactPerson elements")
        }
    }
}

/// MD-013
pub struct NameIdFormatValues;

impl MetadataCheck for NameIdFormatValues {
    fn code(&self) -> &'static str {
        "MD-013"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's metadata contains only NameIDFormat values of 'urn:oasis:names:tc:SAML:2.0:nameid-format:transient' or 'urn:oasis:names:tc:SAML:2.0:nameid-format:persistent' (RECOMMENDATION)"
    }

    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult {
        let Some(md) = metadata else {
            return CheckResult::not_performed(NO_METADATA);
        };
        if md.name_id_formats.is_empty() {
            return CheckResult::warning(
                "The Service Provider's metadata does not contain a NameIDFormat element",
            );
        }
        for format in &md.name_id_formats {
            match format.as_str() {
                "" => {
                    return CheckResult::critical("The Service Provider's metadata contains an empty 'NameIDFormat' element, which makes the metadata invalid");
                }
                NAMEID_FORMAT_TRANSIENT | NAMEID_FORMAT_PERSISTENT => {}
                _ => {
                    return CheckResult::warning(format!(
                        "The Service Provider's metadata contains at least one NameIDFormat value other than '{}' or '{}'",
                        NAMEID_FORMAT_TRANSIENT, NAMEID_FORMAT_PERSISTENT
                    ));
                }
            }
        }
        CheckResult::ok(format!(
            "The Service Provider's metadata contains only NameIDFormat values of '{}' or '{}'",
            NAMEID_FORMAT_TRANSIENT, NAMEID_FORMAT_PERSISTENT
        ))
    }
}
