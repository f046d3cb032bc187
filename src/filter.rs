use crate::checks::TestCase;

/// Select test cases based on --check and --skip prefixes.
///
/// `include`: if Some, only cases whose code starts with one of these prefixes are kept.
/// `exclude`: if Some, cases whose code starts with one of these prefixes are removed.
/// Include is applied first, then exclude. Filtering happens before execution,
/// so a skipped login case never talks to the SP.
pub fn apply_filters(
    cases: Vec<TestCase>,
    include: Option<&[String]>,
    exclude: Option<&[String]>,
) -> Vec<TestCase> {
    cases
        .into_iter()
        .filter(|case| {
            let code = case.code();
            if let Some(prefixes) = include {
                if !prefixes.iter().any(|p| code.starts_with(p.as_str())) {
                    return false;
                }
            }
            if let Some(prefixes) = exclude {
                if prefixes.iter().any(|p| code.starts_with(p.as_str())) {
                    return false;
                }
            }
            true
        })
        .collect()
}
