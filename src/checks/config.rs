use crate::checks::ConfigCheck;
use crate::config::SpConfig;
use crate::names::NAMEFORMAT_URI;
use crate::result::CheckResult;

/// CFG-001
pub struct AttributeNameFormat;

impl ConfigCheck for AttributeNameFormat {
    fn code(&self) -> &'static str {
        "CFG-001"
    }

    fn description(&self) -> &'static str {
        "Test if the correct NameFormat is configured for attributes (MUST requirement)"
    }

    fn check(&self, sp: &SpConfig) -> CheckResult {
        if sp.attributes.is_empty() {
            return CheckResult::ok(
                "No attributes were configured so the NameFormat restriction doesn't apply",
            );
        }
        match sp
            .attributes
            .iter()
            .find(|a| a.name_format.as_deref() != Some(NAMEFORMAT_URI))
        {
            Some(attr) => CheckResult::warning(format!(
                "A configured attribute ({}) uses a NameFormat other than '{}'",
                attr.name, NAMEFORMAT_URI
            )),
            None => CheckResult::ok("All attributes were configured with the correct NameFormat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamlAttribute;
    use crate::result::Severity;

    fn sp(formats: &[Option<&str>]) -> SpConfig {
        SpConfig {
            attributes: formats
                .iter()
                .enumerate()
                .map(|(i, f)| SamlAttribute {
                    name: format!("attr{}", i),
                    name_format: f.map(str::to_string),
                    values: vec!["v".to_string()],
                })
                .collect(),
            ..SpConfig::default()
        }
    }

    #[test]
    fn test_no_attributes() {
        let result = AttributeNameFormat.check(&sp(&[]));
        assert_eq!(result.severity, Severity::Ok);
        assert!(result.message.contains("doesn't apply"));
    }

    #[test]
    fn test_all_uri() {
        let result = AttributeNameFormat.check(&sp(&[Some(NAMEFORMAT_URI), Some(NAMEFORMAT_URI)]));
        assert_eq!(result.severity, Severity::Ok);
    }

    #[test]
    fn test_other_or_missing_format() {
        let basic = "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";
        let result = AttributeNameFormat.check(&sp(&[Some(NAMEFORMAT_URI), Some(basic)]));
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.message.contains("attr1"));

        let result = AttributeNameFormat.check(&sp(&[None]));
        assert_eq!(result.severity, Severity::Warning);
    }
}
