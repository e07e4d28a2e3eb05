//! End-to-end runs of the orchestrator with scripted collaborators

use factory_core::{
    CancelToken, FactoryError, Orchestrator, Phase, PhaseContext, PipelineResult, Strategy,
};
use factory_gate::{ArtifactSet, GateKind, REQUIREMENTS};
use factory_registry::{Category, CheckId, CheckRef, RegistrySet};
use factory_test_utils::{
    ScriptedGenerator, ScriptedRunner, Workspace, AMBIGUOUS_REQUIREMENTS, FEATURE_CHECK,
    FEATURE_REQUIREMENTS,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const BASELINE_CHECK: &str = "tests/unit/test_users.py::test_create";
const SPEC: &str = "# Login\n\nUsers log in with a password.\n";

struct Harness {
    ws: Workspace,
    runner: Arc<ScriptedRunner>,
    generator: Arc<ScriptedGenerator>,
}

impl Harness {
    /// Green baseline, feature check red until IMPLEMENT or DIRECT_IMPLEMENT runs
    fn new() -> Self {
        let ws = Workspace::new();
        ws.seed_baseline(Category::PureUnit, &[BASELINE_CHECK]);
        let runner = Arc::new(ScriptedRunner::failing([FEATURE_CHECK]));
        let generator = Arc::new(ScriptedGenerator::feature());
        for phase in [Phase::Implement, Phase::DirectImplement] {
            let runner = Arc::clone(&runner);
            generator.on(phase, move |_| runner.pass(FEATURE_CHECK));
        }
        Self {
            ws,
            runner,
            generator,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.ws.root(),
            self.ws.config(),
            self.runner.clone(),
            self.generator.clone(),
        )
    }

    async fn run(&self) -> Result<PipelineResult, FactoryError> {
        let spec = self.ws.write_spec("login.md", SPEC);
        self.orchestrator().run(&spec).await
    }

    fn count(&self, phase: Phase) -> usize {
        self.generator.phases().iter().filter(|p| **p == phase).count()
    }
}

fn feature_ref() -> CheckRef {
    CheckRef::new(FEATURE_CHECK, Category::PureUnit)
}

#[tokio::test]
async fn default_strategy_runs_to_done_and_promotes() {
    let h = Harness::new();

    let result = h.run().await.unwrap();

    match &result {
        PipelineResult::Completed {
            strategy, promoted, ..
        } => {
            assert_eq!(*strategy, Some(Strategy::Default));
            assert_eq!(*promoted, 1);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(
        h.generator.phases(),
        vec![
            Phase::Requirements,
            Phase::AuthorTests,
            Phase::Implement,
            Phase::ExecuteTests,
            Phase::ExecuteImplementation,
        ]
    );

    let registry = h.ws.registry().load().unwrap();
    assert!(registry.query(RegistrySet::New, None).is_empty());
    assert!(registry.query(RegistrySet::Baseline, None).contains(&feature_ref()));

    let state = h.orchestrator().state_store().load().unwrap();
    assert_eq!(state.current_phase, Phase::Done);
    assert_eq!(state.run_id, result.run_id());
    assert!(state.post_implementation_passed());
    let labels: Vec<&str> = state.decisions.iter().map(|d| d.decision.as_str()).collect();
    for expected in [
        "spec-ingested",
        "gate:pre-generation",
        "strategy",
        "checks-registered",
        "gate:post-test-authoring",
        "implementation-attempts",
        "gate:post-implementation",
        "promotion",
    ] {
        assert!(labels.contains(&expected), "missing {expected} in {labels:?}");
    }
}

#[tokio::test]
async fn ambiguous_requirements_take_the_alternate_path() {
    let h = Harness::new();
    h.generator
        .script(Phase::Requirements, "requirements", "requirements.md", AMBIGUOUS_REQUIREMENTS);

    let result = h.run().await.unwrap();

    assert!(result.is_success());
    assert_eq!(
        h.generator.phases(),
        vec![Phase::Requirements, Phase::DirectImplement, Phase::ExtractTests]
    );
    let state = h.orchestrator().state_store().load().unwrap();
    assert_eq!(state.strategy, Some(Strategy::Alternate));
    assert!(state.last_gate(GateKind::PostTestAuthoring).is_none());
    assert!(h
        .ws
        .registry()
        .load()
        .unwrap()
        .query(RegistrySet::Baseline, None)
        .contains(&feature_ref()));
}

#[tokio::test]
async fn baseline_drift_stops_before_authoring() {
    let h = Harness::new();
    h.runner.fail(BASELINE_CHECK);

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { phase, gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert_eq!(phase, Phase::Requirements);
    assert_eq!(gate.gate, GateKind::PreGeneration);
    assert_eq!(gate.dynamic_violations[0].rule_name, "baseline-drift");
    assert_eq!(h.generator.phases(), vec![Phase::Requirements]);

    let state = h.orchestrator().state_store().load().unwrap();
    assert_eq!(state.current_phase, Phase::Failed);
    assert!(state.strategy.is_none());
}

#[tokio::test]
async fn passing_new_check_blocks_after_authoring() {
    let h = Harness::new();
    h.runner.pass(FEATURE_CHECK);

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { phase, gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert_eq!(phase, Phase::AuthorTests);
    assert_eq!(gate.dynamic_violations[0].rule_name, "new-checks-fail");
    assert_eq!(h.count(Phase::Implement), 0);
    // registered but never promoted
    let registry = h.ws.registry().load().unwrap();
    assert!(registry.query(RegistrySet::New, None).contains(&feature_ref()));
}

#[tokio::test]
async fn manifest_reusing_a_baseline_id_blocks() {
    let h = Harness::new();
    let manifest = serde_json::json!({
        "checks": [{"id": BASELINE_CHECK, "category": "pure-unit", "requirement": "REQ-001"}]
    });
    h.generator
        .script(Phase::AuthorTests, "check-manifest", "checks.json", &manifest.to_string());

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { phase, gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert_eq!(phase, Phase::AuthorTests);
    assert_eq!(gate.static_violations[0].rule_name, "registry-duplicate");
    assert!(h.ws.registry().load().unwrap().query(RegistrySet::New, None).is_empty());
}

#[tokio::test]
async fn multi_category_manifest_with_baseline_id_registers_nothing() {
    let h = Harness::new();
    let manifest = serde_json::json!({
        "checks": [
            {"id": "tests/integration/test_login_db.py::test_session", "category": "service-integration", "requirement": "REQ-001"},
            {"id": BASELINE_CHECK, "category": "pure-unit", "requirement": "REQ-001"},
        ]
    });
    h.generator
        .script(Phase::AuthorTests, "check-manifest", "checks.json", &manifest.to_string());

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { phase, gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert_eq!(phase, Phase::AuthorTests);
    assert_eq!(gate.static_violations[0].rule_name, "registry-duplicate");
    let registry = h.ws.registry().load().unwrap();
    assert!(registry.query(RegistrySet::New, None).is_empty());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn manifest_moving_a_baseline_id_to_another_category_blocks() {
    let h = Harness::new();
    let manifest = serde_json::json!({
        "checks": [
            {"id": FEATURE_CHECK, "category": "pure-unit", "requirement": "REQ-001"},
            {"id": BASELINE_CHECK, "category": "end-to-end", "requirement": "REQ-001"},
        ]
    });
    h.generator
        .script(Phase::AuthorTests, "check-manifest", "checks.json", &manifest.to_string());

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert!(gate
        .static_violations
        .iter()
        .any(|v| v.location.contains(BASELINE_CHECK)));
    let registry = h.ws.registry().load().unwrap();
    assert!(registry.query(RegistrySet::New, None).is_empty());
    assert_eq!(
        registry.categories_of(&CheckId::new(BASELINE_CHECK)),
        [Category::PureUnit].into()
    );
}

#[tokio::test]
async fn implementation_retries_with_feedback_then_blocks() {
    let h = Harness::new();
    let runner = Arc::clone(&h.runner);
    // undo the pass hook on every attempt
    h.generator.on(Phase::Implement, move |_| runner.fail(FEATURE_CHECK));

    let result = h.run().await.unwrap();

    let PipelineResult::Blocked { phase, gate, .. } = result else {
        panic!("expected a blocked run");
    };
    assert_eq!(phase, Phase::Implement);
    assert_eq!(gate.gate, GateKind::PostImplementation);
    assert_eq!(gate.dynamic_violations[0].rule_name, "checks-pass");

    let attempts: Vec<_> = h
        .generator
        .requests()
        .into_iter()
        .filter(|r| r.phase_kind == Phase::Implement)
        .collect();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[0].feedback, None);
    assert!(attempts[1].feedback.as_deref().unwrap_or_default().contains(FEATURE_CHECK));
    assert_eq!(attempts[2].attempt, 3);
}

#[tokio::test]
async fn cancelled_run_resumes_without_replaying_finished_phases() {
    let h = Harness::new();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    h.generator.on(Phase::AuthorTests, move |_| trigger.cancel());

    let spec = h.ws.write_spec("login.md", SPEC);
    let first = h.orchestrator().with_cancel(cancel);
    let result = first.run(&spec).await.unwrap();
    assert_eq!(
        result,
        PipelineResult::Cancelled {
            run_id: result.run_id(),
            phase: Phase::AuthorTests,
        }
    );

    let state = first.state_store().load().unwrap();
    assert_eq!(state.current_phase, Phase::AuthorTests);
    assert_eq!(state.strategy, Some(Strategy::Default));

    let refused = h.orchestrator().run(&spec).await.unwrap_err();
    assert!(refused.is_configuration());

    let resumed = h.orchestrator().resume().await.unwrap();
    assert!(resumed.is_success());
    assert_eq!(resumed.run_id(), result.run_id());
    assert_eq!(h.count(Phase::Requirements), 1);
    assert_eq!(h.count(Phase::AuthorTests), 2);
    assert_eq!(h.count(Phase::Implement), 1);
}

#[tokio::test]
async fn transport_failure_is_retried_once_then_stops_resumably() {
    let h = Harness::new();
    h.generator.fail_transport(Phase::Requirements, 2);

    let err = h.run().await.unwrap_err();
    assert!(matches!(err, FactoryError::Transport { phase: Phase::Requirements, .. }));
    assert_eq!(h.count(Phase::Requirements), 2);

    let state = h.orchestrator().state_store().load().unwrap();
    assert_eq!(state.current_phase, Phase::Requirements);

    assert!(h.orchestrator().resume().await.unwrap().is_success());
}

#[tokio::test]
async fn single_phase_execution_leaves_run_state_alone() {
    let h = Harness::new();
    let requirements = h.ws.write("input/requirements.md", FEATURE_REQUIREMENTS);
    let context = PhaseContext {
        artifacts: ArtifactSet::new().with(REQUIREMENTS, requirements),
        ..PhaseContext::default()
    };
    let context_file = h.ws.write("input/context.json", &serde_json::to_string(&context).unwrap());

    let orchestrator = h.orchestrator();
    let report = orchestrator
        .run_phase(Phase::StrategyDecision, &h.ws.root().join(context_file))
        .await
        .unwrap();

    assert_eq!(report.strategy, Some(Strategy::Default));
    assert_eq!(report.decisions[0].decision, "strategy");
    assert!(report.gate.is_none());
    assert!(!orchestrator.state_store().exists());
}

#[tokio::test]
async fn finalize_refuses_without_a_passing_gate() {
    let h = Harness::new();
    h.ws.registry()
        .add_new(Category::PureUnit, [CheckId::new(FEATURE_CHECK)])
        .unwrap();
    let context_file = h.ws.write("input/context.json", "{}");

    let err = h
        .orchestrator()
        .run_phase(Phase::Finalize, &h.ws.root().join(context_file))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("refusing to promote"));
    let registry = h.ws.registry().load().unwrap();
    assert!(registry.query(RegistrySet::New, None).contains(&feature_ref()));
}

#[tokio::test]
async fn terminal_phases_cannot_be_executed() {
    let h = Harness::new();
    let context_file = h.ws.write("input/context.json", "{}");
    let err = h
        .orchestrator()
        .run_phase(Phase::Done, &h.ws.root().join(context_file))
        .await
        .unwrap_err();
    assert!(matches!(err, FactoryError::Terminal(_)));
}
