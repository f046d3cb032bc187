use crate::checks::RequestCheck;
use crate::names::{BINDING_HTTP_POST, BINDING_HTTP_REDIRECT};
use crate::parsers::authn_request::AuthnRequest;
use crate::result::CheckResult;

/// REQ-001
pub struct SentByRedirect;

impl RequestCheck for SentByRedirect {
    fn code(&self) -> &'static str {
        "REQ-001"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider can send its Authentication Requests using the HTTP-Redirect binding (MUST requirement)"
    }

    fn check(&self, _request: &AuthnRequest, binding: &str) -> CheckResult {
        if binding.eq_ignore_ascii_case(BINDING_HTTP_REDIRECT) {
            CheckResult::ok("The Service Provider sent its Authentication Request using the HTTP-Redirect binding")
        } else {
            CheckResult::error(format!(
                "The Service Provider did not send its Authentication Request using the HTTP-Redirect binding. Instead, it used: {}",
                binding
            ))
        }
    }
}

/// REQ-002
pub struct HasAcsUrl;

impl RequestCheck for HasAcsUrl {
    fn code(&self) -> &'static str {
        "REQ-002"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's Authentication Request contains an AssertionConsumerServiceURL attribute (MUST requirement)"
    }

    fn check(&self, request: &AuthnRequest, _binding: &str) -> CheckResult {
        if request.assertion_consumer_service_url.is_some() {
            CheckResult::ok("The Service Provider's Authentication Request contains an AssertionConsumerServiceURL attribute")
        } else {
            CheckResult::error("The Service Provider's Authentication Request did not contain an AssertionConsumerServiceURL attribute")
        }
    }
}

/// REQ-003
pub struct ProtocolBinding;

impl RequestCheck for ProtocolBinding {
    fn code(&self) -> &'static str {
        "REQ-003"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's Authentication Request contains a ProtocolBinding attribute set to HTTP POST (MUST requirement)"
    }

    fn check(&self, request: &AuthnRequest, _binding: &str) -> CheckResult {
        match request.protocol_binding.as_deref() {
            None => CheckResult::ok(
                "The Service Provider's Authentication Request does not contain a ProtocolBinding attribute",
            ),
            Some(BINDING_HTTP_POST) => CheckResult::ok(
                "The Service Provider's Authentication Request contained a ProtocolBinding attribute set to HTTP POST",
            ),
            Some(other) => CheckResult::error(format!(
                "The Service Provider's Authentication Request contained a ProtocolBinding attribute set to '{}' instead of '{}'",
                other, BINDING_HTTP_POST
            )),
        }
    }
}

/// REQ-004
pub struct NoSubject;

impl RequestCheck for NoSubject {
    fn code(&self) -> &'static str {
        "REQ-004"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider's Authentication Request contains no Subject node (MUST requirement)"
    }

    fn check(&self, request: &AuthnRequest, _binding: &str) -> CheckResult {
        if request.subject_count == 0 {
            CheckResult::ok("The Service Provider's Authentication Request contains no Subject node")
        } else {
            CheckResult::error("The Service Provider's Authentication Request contained a Subject node")
        }
    }
}
