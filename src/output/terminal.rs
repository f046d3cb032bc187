use colored::Colorize;

use crate::idp::metadata::IdpSettings;
use crate::result::{CaseReport, CheckCategory, CheckSummary, Severity};
use crate::runner::RunReport;

pub fn print(report: &RunReport, verbose: bool, idp: &IdpSettings) {
    println!("\n{}", "── Mock IdP ──".bold());
    println!("  {} entity ID {}", "•".dimmed(), idp.entity_id());
    println!("  {} SSO URL   {}", "•".dimmed(), idp.sso_url());

    for category in &CheckCategory::ALL {
        let cat_results: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.category == *category)
            .collect();
        if cat_results.is_empty() {
            continue;
        }

        println!("\n{}", format!("── {} ──", category).bold());

        for result in &cat_results {
            if !verbose && result.passed() {
                continue;
            }
            print_result(result, verbose);
        }
    }

    println!();
    print_summary(&report.summary);
}

fn print_result(result: &CaseReport, verbose: bool) {
    let status = match result.severity {
        Severity::Ok => "OK  ".green().bold(),
        Severity::Warning => "WARN".yellow().bold(),
        Severity::Error => "FAIL".red().bold(),
        Severity::Critical => "CRIT".magenta().bold(),
    };

    let code = format!("[{}]", result.code).dimmed();
    println!("  {} {} {}", status, code, result.message);
    if verbose {
        println!("       {} {}", "→".dimmed(), result.description.dimmed());
    }
}

fn print_summary(summary: &CheckSummary) {
    let line = format!(
        "Summary: {} checks | {} ok | {} warnings | {} errors | {} critical | verdict {}",
        summary.total,
        summary.ok,
        summary.warnings,
        summary.errors,
        summary.critical,
        summary.verdict,
    );

    match summary.verdict {
        Severity::Ok => println!("{}", line.green().bold()),
        Severity::Warning => println!("{}", line.yellow().bold()),
        Severity::Error | Severity::Critical => println!("{}", line.red().bold()),
    }
}
