//! Strategy heuristic
//!
//! Decides between writing checks first and implementing first, from the
//! requirements text alone. Deterministic: the same text and thresholds
//! always give the same strategy.

use crate::config::StrategyConfig;
use crate::phase::Strategy;
use factory_gate::requirement_ids;
use serde::{Deserialize, Serialize};

const AMBIGUITY_MARKERS: &[&str] = &["TBD", "TODO", "[NEEDS CLARIFICATION]"];

/// Inputs and outcome of one strategy decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAssessment {
    pub strategy: Strategy,
    /// Requirement ids, or non-empty lines / 10 when there are none
    pub scope: usize,
    pub ambiguity_markers: usize,
    pub reason: String,
}

/// Assess a requirements document
#[must_use]
pub fn assess(requirements: &str, config: &StrategyConfig) -> StrategyAssessment {
    let ids = requirement_ids(requirements).len();
    let scope = if ids > 0 {
        ids
    } else {
        requirements.lines().filter(|l| !l.trim().is_empty()).count() / 10
    };
    let ambiguity_markers = count_markers(requirements);

    let ambiguous = ambiguity_markers >= config.ambiguity_threshold;
    let large = scope > config.scope_threshold;
    let (strategy, reason) = match (ambiguous, large) {
        (true, _) => (
            Strategy::Alternate,
            format!(
                "{ambiguity_markers} ambiguity markers (threshold {})",
                config.ambiguity_threshold
            ),
        ),
        (false, true) => (
            Strategy::Alternate,
            format!("scope {scope} exceeds threshold {}", config.scope_threshold),
        ),
        (false, false) => (
            Strategy::Default,
            format!("scope {scope}, {ambiguity_markers} ambiguity markers"),
        ),
    };

    StrategyAssessment {
        strategy,
        scope,
        ambiguity_markers,
        reason,
    }
}

fn count_markers(text: &str) -> usize {
    text.lines()
        .map(|line| {
            let trimmed = line.trim();
            let tokens = AMBIGUITY_MARKERS
                .iter()
                .map(|m| trimmed.matches(m).count())
                .sum::<usize>();
            let unclear = trimmed.to_lowercase().matches("unclear").count();
            let question = usize::from(trimmed.ends_with('?'));
            tokens + unclear + question
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StrategyConfig {
        StrategyConfig::default()
    }

    #[test]
    fn small_clear_requirements_take_default() {
        let text = "REQ-001 login\nREQ-002 logout\nREQ-003 session expiry";
        let a = assess(text, &config());
        assert_eq!(a.strategy, Strategy::Default);
        assert_eq!(a.scope, 3);
        assert_eq!(a.ambiguity_markers, 0);
    }

    #[test]
    fn ambiguity_takes_alternate() {
        let text = "REQ-001 login via TBD provider\nREQ-002 Which roles apply?\nREQ-003 error format unclear";
        let a = assess(text, &config());
        assert_eq!(a.ambiguity_markers, 3);
        assert_eq!(a.strategy, Strategy::Alternate);
    }

    #[test]
    fn large_scope_takes_alternate() {
        let text: String = (1..=13).map(|n| format!("REQ-{n:03} item\n")).collect();
        let a = assess(&text, &config());
        assert_eq!(a.scope, 13);
        assert_eq!(a.strategy, Strategy::Alternate);
    }

    #[test]
    fn scope_without_ids_counts_lines() {
        let text: String = (0..25).map(|n| format!("line {n}\n\n")).collect();
        assert_eq!(assess(&text, &config()).scope, 2);
    }

    #[test]
    fn clarification_marker_counts() {
        let text = "REQ-001 [NEEDS CLARIFICATION] auth method";
        assert_eq!(assess(text, &config()).ambiguity_markers, 1);
    }

    #[test]
    fn decision_is_deterministic() {
        let text = "REQ-001 a\nTODO decide b?";
        assert_eq!(assess(text, &config()), assess(text, &config()));
    }
}
