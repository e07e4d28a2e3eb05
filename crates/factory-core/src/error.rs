//! Error types for the factory pipeline
//!
//! A blocked gate is not an error: it is carried in
//! [`PipelineResult::Blocked`](crate::PipelineResult::Blocked). Errors here
//! stop the run.

use crate::phase::Phase;
use factory_gate::GateError;
use factory_registry::RegistryError;
use factory_runner::RunnerError;
use std::path::PathBuf;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// Missing or corrupt configuration, state or input document
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Content generator failed after its retry
    #[error("content generator failed in {phase}: {reason}")]
    Transport {
        /// Phase whose generation failed
        phase: Phase,
        /// Last failure
        reason: String,
    },

    /// Registry read or write failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Check runner aborted outside a gate
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Gate could not reach a verdict
    #[error("gate error: {0}")]
    Gate(#[from] GateError),

    /// Pipeline state could not be read or written
    #[error("state persistence failed for {path}: {reason}")]
    StatePersistence {
        /// State document
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Phase order violated
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Operation not possible in the run's current state
    #[error("run is in a terminal or inconsistent state: {0}")]
    Terminal(String),
}

impl FactoryError {
    /// Errors that need a human to repair a document before anything can run
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::StatePersistence { .. } => true,
            Self::Registry(e) => e.is_configuration(),
            _ => false,
        }
    }

    pub(crate) fn state(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StatePersistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Illegal phase transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("unknown phase name '{0}'")]
    UnknownPhase(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_registry_is_configuration() {
        let err = FactoryError::from(RegistryError::Corrupt {
            path: "r.json".into(),
            reason: "eof".into(),
        });
        assert!(err.is_configuration());
    }
}
