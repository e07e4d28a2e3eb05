//! Gate violations

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a violation is
///
/// Ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Artifact missing or unreadable; nothing else can be judged
    Critical,
    /// Blocks the gate
    Error,
    /// Reported, never blocks
    Warning,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Error, Severity::Warning];

    /// CRITICAL and ERROR block a gate
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::Warning)
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding of a static rule or a dynamic check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Rule that produced the finding
    pub rule_name: String,
    pub severity: Severity,
    /// Artifact, file or check the finding is about
    pub location: String,
    pub description: String,
    /// What a human should do about it
    pub remediation: String,
}

impl Violation {
    /// Violation without remediation text
    #[must_use]
    pub fn new(
        rule_name: impl Into<String>,
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            severity,
            location: location.into(),
            description: description.into(),
            remediation: String::new(),
        }
    }

    /// Attach remediation text
    #[inline]
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity.is_blocking()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} at {}: {}",
            self.severity, self.rule_name, self.location, self.description
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_warnings_do_not_block() {
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::Error.is_blocking());
        assert!(!Severity::Warning.is_blocking());
    }

    #[test]
    fn display_names_rule_and_location() {
        let v = Violation::new("scope-creep", Severity::Warning, "requirements.md:4", "extra work")
            .with_remediation("drop it");
        assert_eq!(
            v.to_string(),
            "[WARNING] scope-creep at requirements.md:4: extra work"
        );
        assert_eq!(v.remediation, "drop it");
    }
}
