//! Gate kinds and results

use crate::violation::{Severity, Violation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// The three gates of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateKind {
    /// After requirements, before any generation: baseline must be green
    PreGeneration,
    /// After checks are authored: new checks fail, baseline stays green
    PostTestAuthoring,
    /// After implementation: everything green
    PostImplementation,
}

impl GateKind {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreGeneration => "pre-generation",
            Self::PostTestAuthoring => "post-test-authoring",
            Self::PostImplementation => "post-implementation",
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateOutcome {
    Pass,
    Blocked,
}

impl fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Blocked => f.write_str("BLOCKED"),
        }
    }
}

/// Verdict of one gate evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateKind,
    pub outcome: GateOutcome,
    pub static_violations: Vec<Violation>,
    pub dynamic_violations: Vec<Violation>,
}

impl GateResult {
    /// Result whose outcome follows from the violations
    #[must_use]
    pub fn from_violations(
        gate: GateKind,
        static_violations: Vec<Violation>,
        dynamic_violations: Vec<Violation>,
    ) -> Self {
        let blocked = static_violations
            .iter()
            .chain(&dynamic_violations)
            .any(Violation::is_blocking);
        Self {
            gate,
            outcome: if blocked {
                GateOutcome::Blocked
            } else {
                GateOutcome::Pass
            },
            static_violations,
            dynamic_violations,
        }
    }

    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == GateOutcome::Pass
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.static_violations.iter().chain(&self.dynamic_violations)
    }

    /// Number of violations at `severity`
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.violations().filter(|v| v.severity == severity).count()
    }

    /// Report grouped by severity, most severe first
    #[must_use]
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Gate {}: {}", self.gate, self.outcome);

        for severity in Severity::ALL {
            let group: Vec<&Violation> =
                self.violations().filter(|v| v.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{severity} ({})", group.len());
            for v in group {
                let _ = writeln!(out, "  [{}] {}", v.rule_name, v.location);
                let _ = writeln!(out, "    issue: {}", v.description);
                if !v.remediation.is_empty() {
                    let _ = writeln!(out, "    fix:   {}", v.remediation);
                }
            }
        }

        let _ = writeln!(
            out,
            "Summary: {} critical, {} errors, {} warnings",
            self.count(Severity::Critical),
            self.count(Severity::Error),
            self.count(Severity::Warning)
        );
        out
    }

    /// Structured export of the whole result
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
