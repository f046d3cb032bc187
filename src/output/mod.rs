pub mod json;
pub mod terminal;

use crate::idp::metadata::IdpSettings;
use crate::runner::RunReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Terminal,
    Json,
}

pub fn print_report(report: &RunReport, verbose: bool, format: OutputFormat, idp: &IdpSettings) {
    match format {
        OutputFormat::Json => json::print(report, idp),
        OutputFormat::Terminal => terminal::print(report, verbose, idp),
    }
}
