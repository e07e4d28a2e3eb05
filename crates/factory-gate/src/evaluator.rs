//! Gate evaluation
//!
//! Static rules run first. A CRITICAL or ERROR static finding blocks the gate
//! before any check is executed; otherwise the gate's dynamic checks run
//! through the configured [`CheckRunner`].

use crate::artifacts::ArtifactSet;
use crate::error::GateError;
use crate::result::{GateKind, GateResult};
use crate::rules::{default_rules, RuleContext, StaticRule};
use crate::violation::{Severity, Violation};
use factory_registry::{CheckRef, Registry, RegistrySet};
use factory_runner::{CheckRunner, RunSummary};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Evaluates gates against artifacts and the registry
pub struct GateEvaluator {
    runner: Arc<dyn CheckRunner>,
    rules: Vec<Box<dyn StaticRule>>,
    base_dir: PathBuf,
}

impl std::fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluator")
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl GateEvaluator {
    /// Evaluator with the built-in rule set
    ///
    /// Relative artifact paths resolve against `base_dir`.
    #[must_use]
    pub fn new(runner: Arc<dyn CheckRunner>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            rules: default_rules(),
            base_dir: base_dir.into(),
        }
    }

    /// Replace the static rule set
    #[must_use]
    pub fn with_rules(mut self, rules: Vec<Box<dyn StaticRule>>) -> Self {
        self.rules = rules;
        self
    }

    /// Static rules only, no checks executed
    #[must_use]
    pub fn static_violations(
        &self,
        gate: GateKind,
        artifacts: &ArtifactSet,
        registry: &Registry,
    ) -> Vec<Violation> {
        let ctx = RuleContext::new(gate, artifacts, registry, &self.base_dir);
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(gate))
            .flat_map(|rule| rule.check(&ctx))
            .collect()
    }

    /// Evaluate `gate`
    ///
    /// # Errors
    /// `GateError::Runner` when the runner aborts the invocation. A failing
    /// check is a violation, never an error.
    pub async fn evaluate(
        &self,
        gate: GateKind,
        artifacts: &ArtifactSet,
        registry: &Registry,
    ) -> Result<GateResult, GateError> {
        let static_violations = self.static_violations(gate, artifacts, registry);

        if static_violations.iter().any(Violation::is_blocking) {
            tracing::warn!(
                %gate,
                violations = static_violations.len(),
                "static rules blocked gate, skipping dynamic checks"
            );
            return Ok(GateResult::from_violations(gate, static_violations, Vec::new()));
        }

        let dynamic_violations = match gate {
            GateKind::PreGeneration => self.baseline_green(registry, "baseline-drift").await?,
            GateKind::PostTestAuthoring => {
                let mut violations = self.new_checks_red(registry).await?;
                violations.extend(self.baseline_green(registry, "baseline-isolation").await?);
                violations
            }
            GateKind::PostImplementation => self.everything_green(registry).await?,
        };

        let result = GateResult::from_violations(gate, static_violations, dynamic_violations);
        if result.passed() {
            tracing::info!(%gate, "gate passed");
        } else {
            tracing::warn!(%gate, violations = result.dynamic_violations.len(), "gate blocked");
        }
        Ok(result)
    }

    async fn run(&self, selection: &BTreeSet<CheckRef>) -> Result<RunSummary, GateError> {
        tracing::debug!(checks = selection.len(), "running gate checks");
        Ok(self.runner.run(selection).await?)
    }

    /// Every baseline check passes
    async fn baseline_green(
        &self,
        registry: &Registry,
        rule: &str,
    ) -> Result<Vec<Violation>, GateError> {
        let summary = self.run(&registry.query(RegistrySet::Baseline, None)).await?;
        Ok(summary
            .failures()
            .map(|o| {
                Violation::new(
                    rule,
                    Severity::Error,
                    o.check_ref().to_string(),
                    format!("baseline check {} ({})", o.status, first_line(&o.detail)),
                )
                .with_remediation("restore the baseline before continuing; never edit a baseline check to pass")
            })
            .collect())
    }

    /// The new set exists and fails as a whole
    async fn new_checks_red(&self, registry: &Registry) -> Result<Vec<Violation>, GateError> {
        let summary = self.run(&registry.query(RegistrySet::New, None)).await?;

        if summary.total == 0 {
            return Ok(vec![Violation::new(
                "new-checks-present",
                Severity::Error,
                "registry.new",
                "no new checks registered for this feature",
            )
            .with_remediation("author failing checks and list them in the check manifest")]);
        }

        // total > 0 and no passes implies failed > 0
        Ok(summary
            .results
            .iter()
            .filter(|o| o.passed)
            .map(|o| {
                Violation::new(
                    "new-checks-fail",
                    Severity::Error,
                    o.check_ref().to_string(),
                    "new check passes before any implementation exists",
                )
                .with_remediation("make the check assert behavior that is not implemented yet")
            })
            .collect())
    }

    /// Baseline and new both pass
    async fn everything_green(&self, registry: &Registry) -> Result<Vec<Violation>, GateError> {
        let summary = self.run(&registry.query_all()).await?;
        Ok(summary
            .failures()
            .map(|o| {
                Violation::new(
                    "checks-pass",
                    Severity::Error,
                    o.check_ref().to_string(),
                    format!("check {} ({})", o.status, first_line(&o.detail)),
                )
                .with_remediation("fix the implementation, not the check")
            })
            .collect())
    }
}

fn first_line(detail: &str) -> &str {
    detail.lines().find(|l| !l.trim().is_empty()).unwrap_or("no output")
}
