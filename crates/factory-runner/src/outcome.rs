//! Check outcomes and run summaries

use factory_registry::{Category, CheckId, CheckRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// Maximum characters of process output kept per failed check
pub const DETAIL_LIMIT: usize = 2000;

/// How a single check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    /// Exit status zero
    Passed,
    /// Non-zero exit
    Failed,
    /// Killed after the per-check timeout
    TimedOut,
    /// Required backing service never became reachable
    ServiceUnavailable,
    /// Could not be executed at all
    Error,
}

impl OutcomeStatus {
    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
            Self::ServiceUnavailable => "service-unavailable",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub id: CheckId,
    pub category: Category,
    pub passed: bool,
    pub status: OutcomeStatus,
    /// Output excerpt, empty on success
    pub detail: String,
}

impl CheckOutcome {
    #[must_use]
    pub fn passed(check: &CheckRef) -> Self {
        Self {
            id: check.id.clone(),
            category: check.category,
            passed: true,
            status: OutcomeStatus::Passed,
            detail: String::new(),
        }
    }

    /// Failed outcome with `status` and a truncated `detail`
    #[must_use]
    pub fn failed(check: &CheckRef, status: OutcomeStatus, detail: impl Into<String>) -> Self {
        Self {
            id: check.id.clone(),
            category: check.category,
            passed: false,
            status,
            detail: truncate(detail.into()),
        }
    }

    #[inline]
    #[must_use]
    pub fn check_ref(&self) -> CheckRef {
        CheckRef::new(self.id.clone(), self.category)
    }
}

fn truncate(mut detail: String) -> String {
    if detail.len() > DETAIL_LIMIT {
        let mut cut = DETAIL_LIMIT;
        while !detail.is_char_boundary(cut) {
            cut -= 1;
        }
        detail.truncate(cut);
        detail.push_str("\n[truncated]");
    }
    detail
}

/// Aggregate of one runner invocation
///
/// Always holds exactly one outcome per requested check, so
/// `passed + failed == total == results.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CheckOutcome>,
}

impl RunSummary {
    /// Summary with counts derived from `results`, ordered by check
    #[must_use]
    pub fn from_outcomes(mut results: Vec<CheckOutcome>) -> Self {
        results.sort_by(|a, b| (a.category, &a.id).cmp(&(b.category, &b.id)));
        let passed = results.iter().filter(|o| o.passed).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        }
    }

    /// Outcomes that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.results.iter().filter(|o| !o.passed)
    }

    /// Human-readable summary, one line per check plus a totals line
    #[must_use]
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        for outcome in &self.results {
            if outcome.passed {
                let _ = writeln!(out, "PASS  {} [{}]", outcome.id, outcome.category);
            } else {
                let first_line = first_error_line(&outcome.detail);
                let _ = writeln!(
                    out,
                    "FAIL  {} [{}] ({}){}",
                    outcome.id,
                    outcome.category,
                    outcome.status,
                    if first_line.is_empty() {
                        String::new()
                    } else {
                        format!(": {first_line}")
                    }
                );
            }
        }
        let _ = writeln!(out, "{}/{} checks passed", self.passed, self.total);
        out
    }

    /// Compact machine report: `{total, passed, failed, results: [{id, passed, detail}]}`
    #[must_use]
    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            total: self.total,
            passed: self.passed,
            failed: self.failed,
            results: self
                .results
                .iter()
                .map(|o| ReportEntry {
                    id: o.id.as_str(),
                    passed: o.passed,
                    detail: &o.detail,
                })
                .collect(),
        }
    }
}

/// Serializable view for the JSON output surface
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ReportEntry<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ReportEntry<'a> {
    pub id: &'a str,
    pub passed: bool,
    pub detail: &'a str,
}

/// First line that looks like an error, else the first non-empty line
fn first_error_line(detail: &str) -> &str {
    let mut lines = detail.lines().map(str::trim).filter(|l| !l.is_empty());
    detail
        .lines()
        .map(str::trim)
        .find(|l| l.contains("Error") || l.contains("error") || l.starts_with("FAILED"))
        .or_else(|| lines.next())
        .unwrap_or("")
}
