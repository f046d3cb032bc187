use serde::Serialize;

/// Outcome scale of a conformance check, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Reduce many severities to the worst one. An empty input is `Ok`.
    pub fn worst<I>(severities: I) -> Severity
    where
        I: IntoIterator<Item = Severity>,
    {
        severities.into_iter().max().unwrap_or(Severity::Ok)
    }

    /// Severities that make a run fail.
    pub fn is_failure(self) -> bool {
        self >= Severity::Error
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Ok => write!(f, "OK"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    Metadata,
    Request,
    Login,
    Configuration,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 4] = [
        CheckCategory::Metadata,
        CheckCategory::Request,
        CheckCategory::Login,
        CheckCategory::Configuration,
    ];
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::Metadata => write!(f, "SP Metadata"),
            CheckCategory::Request => write!(f, "Authentication Request"),
            CheckCategory::Login => write!(f, "Login"),
            CheckCategory::Configuration => write!(f, "SP Configuration"),
        }
    }
}

/// The verdict of one check invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub severity: Severity,
    pub message: String,
}

impl CheckResult {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, message)
    }

    /// Result for a check whose subject could not be obtained.
    pub fn not_performed(reason: &str) -> Self {
        Self::critical(format!("The test case could not be performed because {}", reason))
    }

    pub fn passed(&self) -> bool {
        self.severity == Severity::Ok
    }
}

/// One line of the conformance report.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub code: &'static str,
    pub category: CheckCategory,
    pub description: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl CaseReport {
    pub fn new(
        code: &'static str,
        category: CheckCategory,
        description: &'static str,
        result: CheckResult,
    ) -> Self {
        Self {
            code,
            category,
            description,
            severity: result.severity,
            message: result.message,
        }
    }

    pub fn passed(&self) -> bool {
        self.severity == Severity::Ok
    }
}

#[derive(Debug, Serialize)]
pub struct CheckSummary {
    pub total: usize,
    pub ok: usize,
    pub warnings: usize,
    pub errors: usize,
    pub critical: usize,
    pub verdict: Severity,
}

impl CheckSummary {
    pub fn from_reports(reports: &[CaseReport]) -> Self {
        let count = |severity: Severity| reports.iter().filter(|r| r.severity == severity).count();
        Self {
            total: reports.len(),
            ok: count(Severity::Ok),
            warnings: count(Severity::Warning),
            errors: count(Severity::Error),
            critical: count(Severity::Critical),
            verdict: Severity::worst(reports.iter().map(|r| r.severity)),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.verdict.is_failure()
    }
}
