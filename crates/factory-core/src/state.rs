//! Durable pipeline state
//!
//! One JSON document per run, rewritten atomically after every completed
//! phase. `current_phase` is always the next phase to execute, so resuming
//! never replays finished work.

use crate::error::FactoryError;
use crate::phase::{Phase, Strategy};
use chrono::{DateTime, Utc};
use factory_gate::{ArtifactSet, GateKind, GateOutcome, GateResult};
use factory_registry::write_json_atomic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use ulid::Ulid;

/// One entry of the decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub phase: Phase,
    /// Short machine-readable label, e.g. `gate:pre-generation` or `strategy`
    pub decision: String,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl DecisionRecord {
    #[must_use]
    pub fn new(phase: Phase, decision: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            phase,
            decision: decision.into(),
            details,
            at: Utc::now(),
        }
    }

    /// Record summarizing a gate evaluation
    #[must_use]
    pub fn gate(phase: Phase, result: &GateResult) -> Self {
        Self::new(phase, gate_label(result.gate), result.to_json())
    }

    /// Gate result carried by a gate record
    #[must_use]
    pub fn gate_result(&self) -> Option<GateResult> {
        if !self.decision.starts_with("gate:") {
            return None;
        }
        serde_json::from_value(self.details.clone()).ok()
    }
}

fn gate_label(gate: GateKind) -> String {
    format!("gate:{gate}")
}

/// Resumable record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Ulid,
    /// Next phase to execute
    pub current_phase: Phase,
    /// `None` until STRATEGY_DECISION completes
    pub strategy: Option<Strategy>,
    pub artifacts: ArtifactSet,
    pub decisions: Vec<DecisionRecord>,
    /// Human spec the run started from
    pub spec_ref: PathBuf,
    /// SHA-256 of the spec at ingest, hex encoded
    pub spec_digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Fresh run positioned at SPEC_INGEST
    #[must_use]
    pub fn new(spec_ref: impl Into<PathBuf>, spec_digest: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Ulid::new(),
            current_phase: Phase::SpecIngest,
            strategy: None,
            artifacts: ArtifactSet::new(),
            decisions: Vec::new(),
            spec_ref: spec_ref.into(),
            spec_digest: spec_digest.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// Latest gate result of the given kind
    #[must_use]
    pub fn last_gate(&self, gate: GateKind) -> Option<GateResult> {
        let label = gate_label(gate);
        self.decisions
            .iter()
            .rev()
            .filter(|d| d.decision == label)
            .find_map(DecisionRecord::gate_result)
    }

    /// Whether the log holds a passing post-implementation gate
    #[must_use]
    pub fn post_implementation_passed(&self) -> bool {
        self.last_gate(GateKind::PostImplementation)
            .is_some_and(|r| r.outcome == GateOutcome::Pass)
    }

    /// Most recent blocked gate, with the phase that evaluated it
    #[must_use]
    pub fn last_blocked(&self) -> Option<(Phase, GateResult)> {
        self.decisions.iter().rev().find_map(|d| {
            d.gate_result()
                .filter(|r| r.outcome == GateOutcome::Blocked)
                .map(|r| (d.phase, r))
        })
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// SHA-256 of `bytes`, hex encoded
#[must_use]
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persists [`PipelineState`] at a fixed path
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    /// - `FactoryError::Configuration` when no state exists or it cannot be parsed
    /// - `FactoryError::StatePersistence` on read failure
    pub fn load(&self) -> Result<PipelineState, FactoryError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FactoryError::Configuration(format!(
                    "no pipeline state at {}; start a run first",
                    self.path.display()
                )))
            }
            Err(e) => return Err(FactoryError::state(&self.path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| {
            FactoryError::Configuration(format!(
                "pipeline state {} is corrupt: {e}",
                self.path.display()
            ))
        })
    }

    /// Atomically replace the persisted state
    ///
    /// # Errors
    /// `FactoryError::StatePersistence`
    pub fn save(&self, state: &PipelineState) -> Result<(), FactoryError> {
        write_json_atomic(&self.path, state).map_err(|e| FactoryError::state(&self.path, e))?;
        tracing::debug!(
            run_id = %state.run_id,
            phase = %state.current_phase,
            "pipeline state saved"
        );
        Ok(())
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
