//! The SAML2Int test case catalog.
//!
//! Checks are grouped by what they examine. Each group is a trait so the
//! aggregator can hand every check exactly the subject it needs; the
//! [`TestCase`] enum is the closed set of those groups.

pub mod config;
pub mod login;
pub mod metadata;
pub mod request;

use std::sync::Arc;

use crate::config::SpConfig;
use crate::login::{IdpContext, LoginAttempt};
use crate::parsers::authn_request::AuthnRequest;
use crate::parsers::sp_metadata::SpMetadata;
use crate::result::{CheckCategory, CheckResult};

pub use metadata::{HttpFetcher, MetadataFetcher};

/// Checks on the SP's metadata document. `None` means no usable metadata.
pub trait MetadataCheck: Send + Sync {
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn check(&self, metadata: Option<&SpMetadata>) -> CheckResult;
}

/// Checks on an AuthnRequest captured from the SP.
pub trait RequestCheck: Send + Sync {
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// `binding` is the binding URI the request arrived with.
    fn check(&self, request: &AuthnRequest, binding: &str) -> CheckResult;
}

/// Checks on the outcome of login exchanges.
pub trait LoginCheck: Send + Sync {
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// The logins to perform, in order.
    fn login_attempts(&self, context: &Arc<IdpContext>) -> Vec<LoginAttempt>;

    /// Grade the outcomes. `outcomes[i]` belongs to attempt `i`.
    ///
    /// # Panics
    ///
    /// When the number of outcomes differs from the number of attempts.
    fn check(&self, outcomes: &[bool]) -> CheckResult;
}

/// Checks on the SP configuration the tester was given.
pub trait ConfigCheck: Send + Sync {
    fn code(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn check(&self, sp: &SpConfig) -> CheckResult;
}

pub enum TestCase {
    Metadata(Box<dyn MetadataCheck>),
    Request(Box<dyn RequestCheck>),
    Login(Box<dyn LoginCheck>),
    Config(Box<dyn ConfigCheck>),
}

impl TestCase {
    pub fn code(&self) -> &'static str {
        match self {
            TestCase::Metadata(c) => c.code(),
            TestCase::Request(c) => c.code(),
            TestCase::Login(c) => c.code(),
            TestCase::Config(c) => c.code(),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TestCase::Metadata(c) => c.description(),
            TestCase::Request(c) => c.description(),
            TestCase::Login(c) => c.description(),
            TestCase::Config(c) => c.description(),
        }
    }

    pub fn category(&self) -> CheckCategory {
        match self {
            TestCase::Metadata(_) => CheckCategory::Metadata,
            TestCase::Request(_) => CheckCategory::Request,
            TestCase::Login(_) => CheckCategory::Login,
            TestCase::Config(_) => CheckCategory::Configuration,
        }
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestCase({} {})", self.category(), self.code())
    }
}

/// Every SAML2Int check, in report order. `fetcher` retrieves documents
/// for the well-known location check.
pub fn catalog(fetcher: Arc<dyn MetadataFetcher>) -> Vec<TestCase> {
    vec![
        TestCase::Metadata(Box::new(metadata::MetadataAvailable)),
        TestCase::Metadata(Box::new(metadata::RequiredElements)),
        TestCase::Metadata(Box::new(metadata::WellKnownLocation::new(fetcher))),
        TestCase::Metadata(Box::new(metadata::NameIdFormatPresent)),
        TestCase::Metadata(Box::new(metadata::AttributeNameFormat)),
        TestCase::Metadata(Box::new(metadata::AttributeConsumingService)),
        TestCase::Metadata(Box::new(metadata::ServiceNamePresent)),
        TestCase::Metadata(Box::new(metadata::EnglishServiceName)),
        TestCase::Metadata(Box::new(metadata::AcsUsesTls)),
        TestCase::Metadata(Box::new(metadata::EncryptionKey)),
        TestCase::Metadata(Box::new(metadata::ContactPersons)),
        TestCase::Metadata(Box::new(metadata::ContactEmail)),
        TestCase::Metadata(Box::new(metadata::NameIdFormatValues)),
        TestCase::Request(Box::new(request::SentByRedirect)),
        TestCase::Request(Box::new(request::HasAcsUrl)),
        TestCase::Request(Box::new(request::ProtocolBinding)),
        TestCase::Request(Box::new(request::NoSubject)),
        TestCase::Login(Box::new(login::TransientOrPersistent)),
        TestCase::Login(Box::new(login::IdpInitiated)),
        TestCase::Config(Box::new(config::AttributeNameFormat)),
    ]
}
