//! Pipeline phases and their transition rules
//!
//! ```text
//! SPEC_INGEST -> REQUIREMENTS [pre-generation] -> STRATEGY_DECISION
//!   DEFAULT:   AUTHOR_TESTS [post-test-authoring] -> IMPLEMENT [post-implementation]
//!              -> EXECUTE_TESTS -> EXECUTE_IMPLEMENTATION
//!   ALTERNATE: DIRECT_IMPLEMENT -> EXTRACT_TESTS -> VERIFY [post-implementation]
//! -> FINALIZE -> DONE
//! ```
//!
//! Any phase may move to `FAILED`.

use crate::error::StateMachineError;
use factory_gate::GateKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution strategy chosen after requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    /// Checks first, then implementation
    Default,
    /// Implementation first, checks extracted afterwards
    Alternate,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("DEFAULT"),
            Self::Alternate => f.write_str("ALTERNATE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    SpecIngest,
    Requirements,
    StrategyDecision,
    AuthorTests,
    Implement,
    ExecuteTests,
    ExecuteImplementation,
    DirectImplement,
    ExtractTests,
    Verify,
    Finalize,
    Done,
    Failed,
}

impl Phase {
    pub const ALL: [Phase; 13] = [
        Phase::SpecIngest,
        Phase::Requirements,
        Phase::StrategyDecision,
        Phase::AuthorTests,
        Phase::Implement,
        Phase::ExecuteTests,
        Phase::ExecuteImplementation,
        Phase::DirectImplement,
        Phase::ExtractTests,
        Phase::Verify,
        Phase::Finalize,
        Phase::Done,
        Phase::Failed,
    ];

    /// Kebab-case name used on the command line
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecIngest => "spec-ingest",
            Self::Requirements => "requirements",
            Self::StrategyDecision => "strategy-decision",
            Self::AuthorTests => "author-tests",
            Self::Implement => "implement",
            Self::ExecuteTests => "execute-tests",
            Self::ExecuteImplementation => "execute-implementation",
            Self::DirectImplement => "direct-implement",
            Self::ExtractTests => "extract-tests",
            Self::Verify => "verify",
            Self::Finalize => "finalize",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Phase that follows a successful run of `self`
    ///
    /// `STRATEGY_DECISION` needs the recorded strategy; `None` means the
    /// successor cannot be known yet or `self` is terminal.
    #[must_use]
    pub fn next(&self, strategy: Option<Strategy>) -> Option<Phase> {
        use Phase::*;
        match self {
            SpecIngest => Some(Requirements),
            Requirements => Some(StrategyDecision),
            StrategyDecision => strategy.map(|s| match s {
                Strategy::Default => AuthorTests,
                Strategy::Alternate => DirectImplement,
            }),
            AuthorTests => Some(Implement),
            Implement => Some(ExecuteTests),
            ExecuteTests => Some(ExecuteImplementation),
            ExecuteImplementation => Some(Finalize),
            DirectImplement => Some(ExtractTests),
            ExtractTests => Some(Verify),
            Verify => Some(Finalize),
            Finalize => Some(Done),
            Done | Failed => None,
        }
    }

    /// Gate evaluated at the end of the phase
    #[must_use]
    pub fn gate(&self) -> Option<GateKind> {
        match self {
            Self::Requirements => Some(GateKind::PreGeneration),
            Self::AuthorTests => Some(GateKind::PostTestAuthoring),
            Self::Implement | Self::Verify => Some(GateKind::PostImplementation),
            _ => None,
        }
    }

    /// Instruction profile handed to the content generator
    #[must_use]
    pub fn instruction_profile(&self) -> Option<&'static str> {
        match self {
            Self::Requirements => Some("spec-to-requirements"),
            Self::AuthorTests => Some("requirements-to-red"),
            Self::Implement => Some("red-to-green"),
            Self::ExecuteTests => Some("execute-red"),
            Self::ExecuteImplementation => Some("execute-green"),
            Self::DirectImplement => Some("seed-implementation"),
            Self::ExtractTests => Some("extract-tests"),
            _ => None,
        }
    }

    /// Phases that write a check manifest whose ids join the new set
    #[inline]
    #[must_use]
    pub fn authors_checks(&self) -> bool {
        matches!(self, Self::AuthorTests | Self::ExtractTests)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = StateMachineError;

    /// Accepts `author-tests`, `author_tests` and `AUTHOR_TESTS`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| StateMachineError::UnknownPhase(s.to_string()))
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> Vec<Phase> {
    use Phase::*;
    match from {
        SpecIngest => vec![Requirements, Failed],
        Requirements => vec![StrategyDecision, Failed],
        StrategyDecision => vec![AuthorTests, DirectImplement, Failed],
        AuthorTests => vec![Implement, Failed],
        Implement => vec![ExecuteTests, Failed],
        ExecuteTests => vec![ExecuteImplementation, Failed],
        ExecuteImplementation => vec![Finalize, Failed],
        DirectImplement => vec![ExtractTests, Failed],
        ExtractTests => vec![Verify, Failed],
        Verify => vec![Finalize, Failed],
        Finalize => vec![Done, Failed],
        Done | Failed => vec![],
    }
}

/// Reject transitions outside [`allowed_transitions`]
///
/// # Errors
/// `StateMachineError::IllegalTransition`
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}
