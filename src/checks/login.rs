use std::sync::Arc;

use crate::checks::LoginCheck;
use crate::login::{IdpContext, LoginAttempt};
use crate::names::{NAMEID_FORMAT_PERSISTENT, NAMEID_FORMAT_TRANSIENT};
use crate::result::CheckResult;

fn expect_outcomes(code: &str, outcomes: &[bool], attempts: usize) {
    assert_eq!(
        outcomes.len(),
        attempts,
        "{} received {} login outcomes for {} attempts",
        code,
        outcomes.len(),
        attempts
    );
}

/// LOGIN-001: one SP-initiated login per NameID format.
pub struct TransientOrPersistent;

impl LoginCheck for TransientOrPersistent {
    fn code(&self) -> &'static str {
        "LOGIN-001"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider allows logging in with either the persistent or transient name identifier format (MUST requirement)"
    }

    fn login_attempts(&self, context: &Arc<IdpContext>) -> Vec<LoginAttempt> {
        [NAMEID_FORMAT_TRANSIENT, NAMEID_FORMAT_PERSISTENT]
            .into_iter()
            .map(|format| {
                let context = Arc::clone(context);
                LoginAttempt::sp_initiated(move |request| context.build_response(request, format))
            })
            .collect()
    }

    fn check(&self, outcomes: &[bool]) -> CheckResult {
        expect_outcomes(self.code(), outcomes, 2);
        match (outcomes[0], outcomes[1]) {
            (true, true) => CheckResult::ok("The Service Provider could log in with both transient and persistent name identifier format"),
            (true, false) => CheckResult::ok("The Service Provider could log in with transient name identifier format"),
            (false, true) => CheckResult::ok("The Service Provider could log in with persistent name identifier format"),
            (false, false) => CheckResult::error("The Service Provider could not log in with either transient or persistent name identifier format"),
        }
    }
}

/// LOGIN-002: a single unsolicited Response.
pub struct IdpInitiated;

impl LoginCheck for IdpInitiated {
    fn code(&self) -> &'static str {
        "LOGIN-002"
    }

    fn description(&self) -> &'static str {
        "Test if the Service Provider allows IdP-initiated login (MUST requirement)"
    }

    fn login_attempts(&self, context: &Arc<IdpContext>) -> Vec<LoginAttempt> {
        let context = Arc::clone(context);
        vec![LoginAttempt::idp_initiated(move |_| {
            context.build_response(None, NAMEID_FORMAT_TRANSIENT)
        })]
    }

    fn check(&self, outcomes: &[bool]) -> CheckResult {
        expect_outcomes(self.code(), outcomes, 1);
        if outcomes[0] {
            CheckResult::ok("The Service Provider allowed IdP-initiated login")
        } else {
            CheckResult::error("The Service Provider did not allow IdP-initiated login")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::tests::{context, request_xml, REQUEST_ID};
    use crate::names::NS_ASSERTION;
    use crate::parsers::authn_request::AuthnRequest;
    use crate::parsers::xml;
    use crate::result::Severity;

    #[test]
    fn test_transient_only() {
        let result = TransientOrPersistent.check(&[true, false]);
        assert_eq!(result.severity, Severity::Ok);
        assert!(result.message.contains("with transient name identifier format"));
    }

    #[test]
    fn test_neither_format() {
        let result = TransientOrPersistent.check(&[false, false]);
        assert_eq!(result.severity, Severity::Error);
    }

    #[test]
    fn test_persistent_and_both() {
        assert!(TransientOrPersistent
            .check(&[false, true])
            .message
            .contains("with persistent"));
        assert!(TransientOrPersistent
            .check(&[true, true])
            .message
            .contains("both transient and persistent"));
    }

    #[test]
    #[should_panic(expected = "login outcomes")]
    fn test_wrong_outcome_count_panics() {
        TransientOrPersistent.check(&[true]);
    }

    #[test]
    fn test_idp_initiated() {
        assert_eq!(IdpInitiated.check(&[true]).severity, Severity::Ok);
        assert_eq!(IdpInitiated.check(&[false]).severity, Severity::Error);
    }

    #[test]
    fn test_attempts_use_one_format_each() {
        let ctx = context();
        let attempts = TransientOrPersistent.login_attempts(&ctx);
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(LoginAttempt::is_sp_initiated));

        let request = AuthnRequest::parse(&request_xml(REQUEST_ID)).unwrap();
        let formats: Vec<String> = attempts
            .iter()
            .map(|attempt| {
                let doc = xml::parse(&attempt.respond(Some(&request)).unwrap()).unwrap();
                assert_eq!(doc.root.attr("InResponseTo"), Some(REQUEST_ID));
                let name_id = doc.find_all(NS_ASSERTION, "NameID").next().unwrap();
                name_id.attr("Format").unwrap().to_string()
            })
            .collect();
        assert_eq!(formats, vec![NAMEID_FORMAT_TRANSIENT, NAMEID_FORMAT_PERSISTENT]);
    }

    #[test]
    fn test_idp_initiated_attempt_is_unsolicited() {
        let ctx = context();
        let attempts = IdpInitiated.login_attempts(&ctx);
        assert_eq!(attempts.len(), 1);
        assert!(!attempts[0].is_sp_initiated());
        let doc = xml::parse(&attempts[0].respond(None).unwrap()).unwrap();
        assert!(doc.elements().all(|e| e.attr("InResponseTo").is_none()));
    }
}
