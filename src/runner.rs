//! Runs the catalog and rolls the verdicts into one report.

use serde::Serialize;

use crate::checks::TestCase;
use crate::config::SpConfig;
use crate::login::{CapturedRequest, Orchestrator};
use crate::parsers::sp_metadata::SpMetadata;
use crate::result::{CaseReport, CheckResult, CheckSummary};

/// The AuthnRequest the request checks look at.
#[derive(Debug, Clone)]
pub enum RequestSubject {
    /// Supplied up front, e.g. read from a file.
    Provided(CapturedRequest),
    /// Captured from the SP through the orchestrator on first use.
    Capture,
    /// Supplied but unusable; the reason is reported by every request check.
    Unavailable(String),
}

/// Everything the checks examine.
pub struct Subjects<'a> {
    pub metadata: Option<&'a SpMetadata>,
    pub sp: &'a SpConfig,
    pub request: RequestSubject,
    /// `None` when there is no way to reach the SP.
    pub orchestrator: Option<&'a Orchestrator>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub results: Vec<CaseReport>,
    pub summary: CheckSummary,
}

/// Execute every case, in order. A failing case never stops the run.
pub fn run(cases: &[TestCase], subjects: &Subjects<'_>) -> RunReport {
    let mut request: Option<Result<CapturedRequest, String>> = None;

    let results: Vec<CaseReport> = cases
        .iter()
        .map(|case| {
            let result = match case {
                TestCase::Metadata(check) => check.check(subjects.metadata),
                TestCase::Request(check) => {
                    match request.get_or_insert_with(|| obtain_request(subjects)) {
                        Ok(captured) => check.check(&captured.request, &captured.binding),
                        Err(reason) => CheckResult::not_performed(reason.as_str()),
                    }
                }
                TestCase::Login(check) => match subjects.orchestrator {
                    Some(orchestrator) => {
                        let attempts = check.login_attempts(orchestrator.context());
                        let outcomes = orchestrator.run(attempts);
                        check.check(&outcomes)
                    }
                    None => CheckResult::not_performed(
                        "there was no connection to the Service Provider available",
                    ),
                },
                TestCase::Config(check) => check.check(subjects.sp),
            };
            tracing::info!(
                code = case.code(),
                severity = %result.severity,
                "{}",
                result.message
            );
            CaseReport::new(case.code(), case.category(), case.description(), result)
        })
        .collect();

    let summary = CheckSummary::from_reports(&results);
    RunReport { results, summary }
}

fn obtain_request(subjects: &Subjects<'_>) -> Result<CapturedRequest, String> {
    match (&subjects.request, subjects.orchestrator) {
        (RequestSubject::Provided(captured), _) => Ok(captured.clone()),
        (RequestSubject::Capture, Some(orchestrator)) => orchestrator
            .capture_request()
            .map_err(|e| format!("no Authentication Request could be obtained ({})", e)),
        (RequestSubject::Capture, None) => {
            Err("there was no Authentication Request available".to_string())
        }
        (RequestSubject::Unavailable(reason), _) => Err(reason.clone()),
    }
}
