//! Testing utilities for the factory workspace
//!
//! Scripted collaborators and project fixtures shared by the integration
//! tests of every crate.

#![allow(missing_docs)]

use async_trait::async_trait;
use factory_core::{
    ContentGenerator, FactoryConfig, GenerationError, GenerationRequest, GenerationResponse,
    Phase,
};
use factory_gate::ArtifactSet;
use factory_registry::{Category, CheckId, CheckRef, RegistryStore};
use factory_runner::{CheckOutcome, CheckRunner, OutcomeStatus, RunSummary, RunnerError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Check runner whose outcomes are set by the test
///
/// Every check passes unless its id was marked failing. A poisoned victim
/// fails once its trigger has run in any earlier or current invocation.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: Mutex<BTreeSet<String>>,
    poisons: Mutex<Vec<(String, String)>>,
    executed: Mutex<BTreeSet<String>>,
    selections: Mutex<Vec<BTreeSet<CheckRef>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let runner = Self::new();
        runner.failing.lock().extend(ids.into_iter().map(Into::into));
        runner
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    pub fn pass(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    pub fn pass_all(&self) {
        self.failing.lock().clear();
    }

    /// Running `trigger` makes `victim` fail from then on
    pub fn poisons(&self, trigger: &str, victim: &str) {
        self.poisons
            .lock()
            .push((trigger.to_string(), victim.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.selections.lock().len()
    }

    pub fn selections(&self) -> Vec<BTreeSet<CheckRef>> {
        self.selections.lock().clone()
    }

    fn is_failing(&self, id: &str) -> bool {
        if self.failing.lock().contains(id) {
            return true;
        }
        let executed = self.executed.lock();
        self.poisons
            .lock()
            .iter()
            .any(|(trigger, victim)| victim == id && executed.contains(trigger))
    }
}

#[async_trait]
impl CheckRunner for ScriptedRunner {
    async fn run(&self, selection: &BTreeSet<CheckRef>) -> Result<RunSummary, RunnerError> {
        self.selections.lock().push(selection.clone());
        self.executed
            .lock()
            .extend(selection.iter().map(|c| c.id.to_string()));

        let outcomes = selection
            .iter()
            .map(|check| {
                if self.is_failing(check.id.as_str()) {
                    CheckOutcome::failed(check, OutcomeStatus::Failed, "AssertionError: scripted failure")
                } else {
                    CheckOutcome::passed(check)
                }
            })
            .collect();
        Ok(RunSummary::from_outcomes(outcomes))
    }
}

type Hook = Arc<dyn Fn(&GenerationRequest) + Send + Sync>;

/// Content generator that writes canned files per phase
///
/// Files land in the request's output directory and are returned as
/// artifacts under their scripted names.
#[derive(Default)]
pub struct ScriptedGenerator {
    files: Mutex<HashMap<Phase, Vec<(String, String, String)>>>,
    transport_failures: Mutex<HashMap<Phase, u32>>,
    hooks: Mutex<HashMap<Phase, Vec<Hook>>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl std::fmt::Debug for ScriptedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGenerator")
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator producing a small, well-formed feature on either strategy
    ///
    /// Requirements carry `REQ-001`; the check manifest declares
    /// [`FEATURE_CHECK`] as a pure-unit check tracing to it.
    pub fn feature() -> Self {
        let generator = Self::new();
        generator.script(Phase::Requirements, "requirements", "requirements.md", FEATURE_REQUIREMENTS);
        for phase in [Phase::AuthorTests, Phase::ExtractTests] {
            generator.script(phase, "check-manifest", "checks.json", &feature_manifest());
        }
        for phase in [Phase::Implement, Phase::DirectImplement] {
            generator.script(phase, "implementation", "login.py", "def login(user):\n    return True\n");
        }
        generator
    }

    /// On `phase`, write `contents` to `file` and report it as `artifact`
    pub fn script(&self, phase: Phase, artifact: &str, file: &str, contents: &str) {
        let mut files = self.files.lock();
        let entries = files.entry(phase).or_default();
        entries.retain(|(name, _, _)| name != artifact);
        entries.push((artifact.to_string(), file.to_string(), contents.to_string()));
    }

    /// The next `count` calls for `phase` fail with a transport error
    pub fn fail_transport(&self, phase: Phase, count: u32) {
        self.transport_failures.lock().insert(phase, count);
    }

    /// Run `hook` on every successful call for `phase`
    pub fn on<F>(&self, phase: Phase, hook: F)
    where
        F: Fn(&GenerationRequest) + Send + Sync + 'static,
    {
        self.hooks.lock().entry(phase).or_default().push(Arc::new(hook));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.calls.lock().iter().map(|r| r.phase_kind).collect()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        self.calls.lock().push(request.clone());

        {
            let mut failures = self.transport_failures.lock();
            if let Some(remaining) = failures.get_mut(&request.phase_kind) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GenerationError::Transport("connection refused".into()));
                }
            }
        }

        let scripted = self
            .files
            .lock()
            .get(&request.phase_kind)
            .cloned()
            .unwrap_or_default();
        let mut produced = ArtifactSet::new();
        for (artifact, file, contents) in scripted {
            let path = request.output_dir.join(file);
            std::fs::write(&path, contents)
                .map_err(|e| GenerationError::Transport(format!("cannot write {}: {e}", path.display())))?;
            produced.insert(artifact, path);
        }

        let hooks = self
            .hooks
            .lock()
            .get(&request.phase_kind)
            .cloned()
            .unwrap_or_default();
        for hook in hooks {
            hook(request);
        }

        Ok(GenerationResponse {
            produced_artifacts: produced,
            notes: format!("scripted {}", request.phase_kind),
        })
    }
}

pub const FEATURE_CHECK: &str = "tests/unit/test_login.py::test_login";

pub const FEATURE_REQUIREMENTS: &str = "\
# Login

REQ-001: A registered user can log in with a valid password.
REQ-002: A wrong password is rejected.
";

/// Requirements ambiguous enough to pick the alternate strategy
pub const AMBIGUOUS_REQUIREMENTS: &str = "\
# Login

REQ-001: A registered user can log in. Lockout policy TBD.
REQ-002: Session length is unclear.
REQ-003: Should remember-me be supported?
";

pub fn feature_manifest() -> String {
    serde_json::json!({
        "checks": [{
            "id": FEATURE_CHECK,
            "category": "pure-unit",
            "requirement": "REQ-001",
        }]
    })
    .to_string()
}

/// Temporary project root with default configuration
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(dir.path().join(".factory")).expect("create .factory");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> FactoryConfig {
        FactoryConfig::default()
    }

    /// Write a spec and return its path relative to the root
    pub fn write_spec(&self, name: &str, contents: &str) -> PathBuf {
        let relative = PathBuf::from("specs").join(name);
        let path = self.root().join(&relative);
        std::fs::create_dir_all(path.parent().expect("spec parent")).expect("create specs");
        std::fs::write(&path, contents).expect("write spec");
        relative
    }

    /// Write a file under the root and return its relative path
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, contents).expect("write file");
        PathBuf::from(relative)
    }

    pub fn registry(&self) -> RegistryStore {
        RegistryStore::new(FactoryConfig::resolve(self.root(), &self.config().paths.registry))
    }

    /// Register `ids` under `category` directly in the baseline
    pub fn seed_baseline(&self, category: Category, ids: &[&str]) {
        let store = self.registry();
        store
            .add_new(category, ids.iter().copied().map(CheckId::new))
            .expect("seed new");
        store.promote_all().expect("promote seed");
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
