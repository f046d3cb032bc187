use serde::Serialize;

use crate::idp::metadata::IdpSettings;
use crate::result::{CaseReport, CheckSummary};
use crate::runner::RunReport;

#[derive(Serialize)]
struct IdpInfo {
    entity_id: String,
    sso_url: String,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    idp: IdpInfo,
    results: &'a [CaseReport],
    summary: &'a CheckSummary,
}

pub fn print(report: &RunReport, idp: &IdpSettings) {
    let json_report = JsonReport {
        idp: IdpInfo {
            entity_id: idp.entity_id(),
            sso_url: idp.sso_url(),
        },
        results: &report.results,
        summary: &report.summary,
    };
    match serde_json::to_string_pretty(&json_report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize JSON: {}", e),
    }
}
