//! Pipeline orchestrator
//!
//! Drives a run phase by phase. After every phase the state is persisted
//! with `current_phase` pointing at the next phase, so a crash or
//! cancellation resumes exactly where the last completed phase left off.
//! A blocked gate moves the run to `FAILED` and is reported as
//! [`PipelineResult::Blocked`].

use crate::cancel::CancelToken;
use crate::config::FactoryConfig;
use crate::error::FactoryError;
use crate::generation::{
    generate_with_retry, CommandGenerator, ContentGenerator, ConvergingGenerator,
    GenerationRequest,
};
use crate::phase::{validate_transition, Phase, Strategy};
use crate::state::{digest, DecisionRecord, PipelineState, StateStore};
use crate::strategy::assess;
use factory_gate::{
    ArtifactSet, CheckManifest, GateEvaluator, GateKind, GateResult, Severity, Violation,
    CHECK_MANIFEST, REQUIREMENTS, SPEC,
};
use factory_registry::{Category, CheckId, CheckRef, RegistryError, RegistryStore};
use factory_runner::{CheckRunner, ProcessCheckRunner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ulid::Ulid;

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    /// Reached DONE
    Completed {
        run_id: Ulid,
        strategy: Option<Strategy>,
        /// Checks promoted to the baseline at FINALIZE
        promoted: usize,
    },
    /// A gate blocked; the run is FAILED
    Blocked {
        run_id: Ulid,
        phase: Phase,
        gate: GateResult,
    },
    /// Stopped at a phase boundary; `phase` runs next on resume
    Cancelled { run_id: Ulid, phase: Phase },
}

impl PipelineResult {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    #[must_use]
    pub fn run_id(&self) -> Ulid {
        match self {
            Self::Completed { run_id, .. }
            | Self::Blocked { run_id, .. }
            | Self::Cancelled { run_id, .. } => *run_id,
        }
    }
}

/// Input of a single out-of-run phase execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhaseContext {
    pub artifacts: ArtifactSet,
    pub strategy: Option<Strategy>,
    pub spec_ref: Option<PathBuf>,
    pub decisions: Vec<DecisionRecord>,
}

impl PhaseContext {
    /// # Errors
    /// `FactoryError::Configuration` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, FactoryError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FactoryError::Configuration(format!("cannot read context {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            FactoryError::Configuration(format!("invalid context {}: {e}", path.display()))
        })
    }
}

/// Output of a single out-of-run phase execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub artifacts: ArtifactSet,
    pub strategy: Option<Strategy>,
    pub decisions: Vec<DecisionRecord>,
    pub gate: Option<GateResult>,
}

/// Everything one phase produced, applied to the state only once the phase
/// has completed
#[derive(Debug, Default)]
struct PhaseStep {
    artifacts: ArtifactSet,
    decisions: Vec<DecisionRecord>,
    strategy: Option<Strategy>,
    gate: Option<GateResult>,
}

impl PhaseStep {
    fn blocked(&self) -> Option<&GateResult> {
        self.gate.as_ref().filter(|g| !g.passed())
    }
}

pub struct Orchestrator {
    root: PathBuf,
    config: FactoryConfig,
    registry: RegistryStore,
    states: StateStore,
    runner: Arc<dyn CheckRunner>,
    generator: Arc<dyn ContentGenerator>,
    gate: GateEvaluator,
    cancel: CancelToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("root", &self.root)
            .field("registry", &self.registry.path())
            .field("state", &self.states.path())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator for the project at `root` with explicit collaborators
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        config: FactoryConfig,
        runner: Arc<dyn CheckRunner>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let root = root.into();
        let registry = RegistryStore::new(FactoryConfig::resolve(&root, &config.paths.registry));
        let states = StateStore::new(FactoryConfig::resolve(&root, &config.paths.state));
        let gate = GateEvaluator::new(Arc::clone(&runner), root.clone());
        Self {
            root,
            config,
            registry,
            states,
            runner,
            generator,
            gate,
            cancel: CancelToken::new(),
        }
    }

    /// Orchestrator using the process runner and command generator from `config`
    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: FactoryConfig) -> Self {
        let root = root.into();
        let runner = Arc::new(ProcessCheckRunner::new(config.runner_config(), root.clone()));
        let generator = Arc::new(CommandGenerator::new(
            config.generation.command.clone(),
            config.generation.args.clone(),
            root.clone(),
        ));
        Self::new(root, config, runner, generator)
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn state_store(&self) -> &StateStore {
        &self.states
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new run from the human spec at `spec_ref`
    ///
    /// # Errors
    /// - `FactoryError::Configuration` if the spec is unreadable or another
    ///   run is still in progress
    /// - any fatal error of a phase; the state stays at that phase
    pub async fn run(&self, spec_ref: &Path) -> Result<PipelineResult, FactoryError> {
        let bytes = std::fs::read(self.resolve(spec_ref)).map_err(|e| {
            FactoryError::Configuration(format!("cannot read spec {}: {e}", spec_ref.display()))
        })?;

        if self.states.exists() {
            let previous = self.states.load()?;
            if !previous.is_terminal() {
                return Err(FactoryError::Configuration(format!(
                    "run {} is still at {}; resume it or remove {}",
                    previous.run_id,
                    previous.current_phase,
                    self.states.path().display()
                )));
            }
        }

        let state = PipelineState::new(spec_ref, digest(&bytes));
        tracing::info!(run_id = %state.run_id, spec = %spec_ref.display(), "starting run");
        self.states.save(&state)?;
        self.drive(state).await
    }

    /// Continue the persisted run from its next phase
    ///
    /// # Errors
    /// `FactoryError::Configuration` if there is no state, plus any fatal
    /// error of a phase.
    pub async fn resume(&self) -> Result<PipelineResult, FactoryError> {
        let state = self.states.load()?;
        match std::fs::read(self.resolve(&state.spec_ref)) {
            Ok(bytes) if digest(&bytes) != state.spec_digest => {
                tracing::warn!(spec = %state.spec_ref.display(), "spec changed since the run started");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(spec = %state.spec_ref.display(), error = %e, "spec no longer readable");
            }
        }
        tracing::info!(run_id = %state.run_id, phase = %state.current_phase, "resuming run");
        self.drive(state).await
    }

    /// Execute one phase against a context document
    ///
    /// The persisted run state is neither read nor written. Registry side
    /// effects of the phase still apply.
    ///
    /// # Errors
    /// Context errors and any fatal error of the phase.
    pub async fn run_phase(
        &self,
        phase: Phase,
        context_file: &Path,
    ) -> Result<PhaseReport, FactoryError> {
        if phase.is_terminal() {
            return Err(FactoryError::Terminal(format!("{phase} is not executable")));
        }
        let context = PhaseContext::load(context_file)?;
        let spec_ref = context.spec_ref.unwrap_or_default();
        let spec_digest = std::fs::read(self.resolve(&spec_ref))
            .map(|b| digest(&b))
            .unwrap_or_default();

        let mut scratch = PipelineState::new(spec_ref, spec_digest);
        scratch.current_phase = phase;
        scratch.strategy = context.strategy;
        scratch.artifacts = context.artifacts;
        scratch.decisions = context.decisions;

        let step = self.execute(phase, &scratch).await?;
        Ok(PhaseReport {
            phase,
            artifacts: step.artifacts,
            strategy: step.strategy,
            decisions: step.decisions,
            gate: step.gate,
        })
    }

    async fn drive(&self, mut state: PipelineState) -> Result<PipelineResult, FactoryError> {
        loop {
            let phase = state.current_phase;
            if phase.is_terminal() {
                return terminal_result(&state);
            }
            if self.cancel.is_cancelled() {
                tracing::info!(%phase, "cancelled before phase");
                return Ok(PipelineResult::Cancelled {
                    run_id: state.run_id,
                    phase,
                });
            }

            tracing::info!(%phase, "phase started");
            let step = match self.execute(phase, &state).await {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!(%phase, error = %e, "phase failed");
                    return Err(e);
                }
            };

            if self.cancel.is_cancelled() {
                tracing::info!(%phase, "cancelled during phase, discarding its results");
                return Ok(PipelineResult::Cancelled {
                    run_id: state.run_id,
                    phase,
                });
            }

            let blocked = step.blocked().cloned();
            if state.strategy.is_none() {
                state.strategy = step.strategy;
            }
            let next = if blocked.is_some() {
                Phase::Failed
            } else {
                phase.next(state.strategy).ok_or_else(|| {
                    FactoryError::Terminal(format!("no successor for {phase} without a strategy"))
                })?
            };
            validate_transition(phase, next)?;

            state.artifacts.extend(step.artifacts);
            state.decisions.extend(step.decisions);
            state.current_phase = next;
            state.touch();
            self.states.save(&state)?;

            if let Some(gate) = blocked {
                tracing::warn!(%phase, gate = %gate.gate, "run blocked");
                return Ok(PipelineResult::Blocked {
                    run_id: state.run_id,
                    phase,
                    gate,
                });
            }
            tracing::info!(%phase, %next, "phase completed");
        }
    }

    async fn execute(&self, phase: Phase, state: &PipelineState) -> Result<PhaseStep, FactoryError> {
        let mut step = PhaseStep::default();

        match phase {
            Phase::SpecIngest => self.ingest(state, &mut step)?,
            Phase::StrategyDecision => self.decide_strategy(state, &mut step)?,
            Phase::Finalize => self.finalize(state, &mut step)?,
            Phase::Implement => self.implement(state, &mut step).await?,
            Phase::Verify => {}
            Phase::Done | Phase::Failed => {
                return Err(FactoryError::Terminal(format!("{phase} is not executable")))
            }
            _ => {
                let request = self.request(phase, &state.artifacts)?;
                let response =
                    generate_with_retry(self.generator.as_ref(), &request, self.config.generation.timeout())
                        .await?;
                if !response.notes.is_empty() {
                    tracing::debug!(%phase, notes = %response.notes, "generator notes");
                }
                step.artifacts = response.produced_artifacts;
            }
        }

        let mut artifacts = state.artifacts.clone();
        artifacts.extend(step.artifacts.clone());

        if phase.authors_checks() {
            if let Some(blocked) = self.register_manifest(phase, &artifacts, &mut step)? {
                step.decisions.push(DecisionRecord::gate(phase, &blocked));
                step.gate = Some(blocked);
                return Ok(step);
            }
        }

        if let Some(kind) = phase.gate() {
            let registry = self.registry.load()?;
            let result = self.gate.evaluate(kind, &artifacts, &registry).await?;
            step.decisions.push(DecisionRecord::gate(phase, &result));
            step.gate = Some(result);
        }

        Ok(step)
    }

    fn ingest(&self, state: &PipelineState, step: &mut PhaseStep) -> Result<(), FactoryError> {
        let path = self.resolve(&state.spec_ref);
        let bytes = std::fs::read(&path).map_err(|e| {
            FactoryError::Configuration(format!("cannot read spec {}: {e}", path.display()))
        })?;
        let current = digest(&bytes);
        if !state.spec_digest.is_empty() && current != state.spec_digest {
            tracing::warn!(spec = %path.display(), "spec changed between run start and ingest");
        }
        step.artifacts.insert(SPEC, state.spec_ref.clone());
        step.decisions.push(DecisionRecord::new(
            Phase::SpecIngest,
            "spec-ingested",
            serde_json::json!({ "digest": current, "bytes": bytes.len() }),
        ));
        Ok(())
    }

    fn decide_strategy(&self, state: &PipelineState, step: &mut PhaseStep) -> Result<(), FactoryError> {
        if let Some(strategy) = state.strategy {
            tracing::debug!(%strategy, "strategy already recorded");
            step.strategy = Some(strategy);
            return Ok(());
        }
        let path = state
            .artifacts
            .resolve(REQUIREMENTS, &self.root)
            .ok_or_else(|| FactoryError::Configuration("no requirements artifact recorded".into()))?;
        let text = std::fs::read_to_string(&path).map_err(|e| {
            FactoryError::Configuration(format!("cannot read requirements {}: {e}", path.display()))
        })?;

        let assessment = assess(&text, &self.config.strategy);
        tracing::info!(
            strategy = %assessment.strategy,
            scope = assessment.scope,
            ambiguity = assessment.ambiguity_markers,
            "strategy decided"
        );
        step.strategy = Some(assessment.strategy);
        step.decisions.push(DecisionRecord::new(
            Phase::StrategyDecision,
            "strategy",
            serde_json::to_value(&assessment).unwrap_or_default(),
        ));
        Ok(())
    }

    async fn implement(&self, state: &PipelineState, step: &mut PhaseStep) -> Result<(), FactoryError> {
        let request = self.request(Phase::Implement, &state.artifacts)?;
        let selection = self.registry.load()?.query_all();
        let converging = ConvergingGenerator::new(
            self.generator.as_ref(),
            self.runner.as_ref(),
            self.config.generation.max_implementation_attempts,
            self.config.generation.timeout(),
        );
        let outcome = converging.converge(request, &selection).await?;
        if !outcome.converged {
            tracing::warn!(attempts = outcome.attempts, "implementation did not converge");
        }
        step.artifacts = outcome.response.produced_artifacts;
        step.decisions.push(DecisionRecord::new(
            Phase::Implement,
            "implementation-attempts",
            serde_json::json!({
                "attempts": outcome.attempts,
                "converged": outcome.converged,
                "passed": outcome.last_run.passed,
                "failed": outcome.last_run.failed,
            }),
        ));
        Ok(())
    }

    fn finalize(&self, state: &PipelineState, step: &mut PhaseStep) -> Result<(), FactoryError> {
        if !state.post_implementation_passed() {
            return Err(FactoryError::Terminal(
                "refusing to promote without a passing post-implementation gate".into(),
            ));
        }
        let promotion = self.registry.promote_all()?;
        let checks: Vec<String> = promotion.promoted.iter().map(ToString::to_string).collect();
        step.decisions.push(DecisionRecord::new(
            Phase::Finalize,
            "promotion",
            serde_json::json!({ "count": checks.len(), "checks": checks }),
        ));
        Ok(())
    }

    /// Append the manifest's checks to the new set
    ///
    /// All categories are registered in one write. Returns a blocked result,
    /// with nothing registered, when a declared id already belongs to the
    /// baseline or to another category. A missing or unparseable manifest is
    /// left to the gate's static rules.
    fn register_manifest(
        &self,
        phase: Phase,
        artifacts: &ArtifactSet,
        step: &mut PhaseStep,
    ) -> Result<Option<GateResult>, FactoryError> {
        let Some(path) = artifacts.resolve(CHECK_MANIFEST, &self.root) else {
            return Ok(None);
        };
        let Ok(manifest) = CheckManifest::load(&path) else {
            return Ok(None);
        };

        let batches: Vec<(Category, Vec<CheckId>)> = manifest
            .by_category()
            .into_iter()
            .map(|(category, ids)| {
                (category, ids.into_iter().filter(CheckId::is_well_formed).collect())
            })
            .collect();
        let registered: Vec<String> = batches
            .iter()
            .flat_map(|(category, ids)| {
                ids.iter().map(|id| CheckRef::new(id.clone(), *category).to_string())
            })
            .collect();

        let rejected = match self.registry.add_new_batches(batches) {
            Ok(_) => None,
            Err(RegistryError::DuplicateCheck { category, id }) => Some((
                CheckRef::new(id, category),
                "declared as new but already part of the baseline".to_string(),
                "give the new check a distinct id; baseline checks are never re-added",
            )),
            Err(RegistryError::CategoryConflict {
                id,
                registered,
                requested,
            }) => Some((
                CheckRef::new(id, requested),
                format!("already registered as {registered}"),
                "declare each check under the single category it is registered with",
            )),
            Err(e) => return Err(e.into()),
        };
        if let Some((check, message, remediation)) = rejected {
            let gate = phase.gate().unwrap_or(GateKind::PostImplementation);
            let violation = Violation::new(
                "registry-duplicate",
                Severity::Error,
                check.to_string(),
                message,
            )
            .with_remediation(remediation);
            return Ok(Some(GateResult::from_violations(gate, vec![violation], Vec::new())));
        }

        tracing::info!(%phase, checks = registered.len(), "registered new checks from manifest");
        step.decisions.push(DecisionRecord::new(
            phase,
            "checks-registered",
            serde_json::json!({ "checks": registered }),
        ));
        Ok(None)
    }

    fn request(&self, phase: Phase, artifacts: &ArtifactSet) -> Result<GenerationRequest, FactoryError> {
        let profile = phase.instruction_profile().ok_or_else(|| {
            FactoryError::Terminal(format!("{phase} has no instruction profile"))
        })?;
        let instruction_file = self
            .resolve(&self.config.generation.instruction_dir)
            .join(format!("{profile}.md"));
        if !instruction_file.is_file() {
            tracing::debug!(file = %instruction_file.display(), "instruction file not found");
        }
        let output_dir = self.resolve(&self.config.paths.artifacts).join(phase.as_str());
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            FactoryError::Configuration(format!("cannot create {}: {e}", output_dir.display()))
        })?;

        Ok(GenerationRequest {
            phase_kind: phase,
            instruction_profile: profile.to_string(),
            instruction_file,
            current_artifacts: artifacts.clone(),
            output_dir,
            attempt: 1,
            feedback: None,
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        FactoryConfig::resolve(&self.root, path)
    }
}

/// Result of a run that already reached DONE or FAILED
fn terminal_result(state: &PipelineState) -> Result<PipelineResult, FactoryError> {
    match state.current_phase {
        Phase::Done => {
            let promoted = state
                .decisions
                .iter()
                .rev()
                .find(|d| d.decision == "promotion")
                .and_then(|d| d.details["count"].as_u64())
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0);
            Ok(PipelineResult::Completed {
                run_id: state.run_id,
                strategy: state.strategy,
                promoted,
            })
        }
        Phase::Failed => state
            .last_blocked()
            .map(|(phase, gate)| PipelineResult::Blocked {
                run_id: state.run_id,
                phase,
                gate,
            })
            .ok_or_else(|| FactoryError::Terminal("run FAILED without a blocked gate".into())),
        other => Err(FactoryError::Terminal(format!("{other} is not terminal"))),
    }
}
