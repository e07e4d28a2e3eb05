//! Process runner behavior against real child processes

use factory_registry::{Category, CheckRef};
use factory_runner::{
    CategoryConfig, CheckRunner, OutcomeStatus, ProcessCheckRunner, RunnerConfig, RunnerError,
    ServiceConfig,
};
use std::collections::BTreeSet;

/// `sh` script that fails ids starting with `fail` and hangs on `slow`
const SCRIPT: &str = r#"case "$0" in
  fail*) echo "AssertionError: $0 broke" >&2; exit 1 ;;
  slow*) sleep 5 ;;
esac
exit 0"#;

fn sh_category(parallelism: usize, timeout_secs: u64, service: Option<&str>) -> CategoryConfig {
    CategoryConfig {
        command: vec!["sh".into(), "-c".into(), SCRIPT.into(), "{id}".into()],
        parallelism,
        timeout_secs,
        service: service.map(str::to_string),
    }
}

fn runner(dir: &std::path::Path) -> ProcessCheckRunner {
    let config = Category::ALL.iter().fold(RunnerConfig::default(), |config, c| {
        config.with_category(*c, sh_category(4, 1, None))
    });
    ProcessCheckRunner::new(config, dir)
}

fn selection(items: &[(&str, Category)]) -> BTreeSet<CheckRef> {
    items.iter().map(|(id, c)| CheckRef::new(*id, *c)).collect()
}

#[tokio::test]
async fn one_outcome_per_requested_check() {
    let dir = tempfile::tempdir().unwrap();
    let requested = selection(&[
        ("ok-1", Category::PureUnit),
        ("fail-1", Category::PureUnit),
        ("ok-2", Category::ServiceIntegration),
        ("ok-3", Category::EndToEnd),
    ]);

    let summary = runner(dir.path()).run(&requested).await.unwrap();

    assert_eq!(summary.total, requested.len());
    assert_eq!(summary.passed + summary.failed, summary.total);
    assert_eq!((summary.passed, summary.failed), (3, 1));
    let returned: BTreeSet<CheckRef> = summary.results.iter().map(|o| o.check_ref()).collect();
    assert_eq!(returned, requested);

    let failure = summary.failures().next().unwrap();
    assert_eq!(failure.status, OutcomeStatus::Failed);
    assert!(failure.detail.contains("AssertionError: fail-1 broke"));
}

#[tokio::test]
async fn empty_selection_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let summary = runner(dir.path()).run(&BTreeSet::new()).await.unwrap();
    assert_eq!((summary.total, summary.passed, summary.failed), (0, 0, 0));
}

#[tokio::test]
async fn timeout_fails_only_that_check() {
    let dir = tempfile::tempdir().unwrap();
    let requested = selection(&[("slow-1", Category::PureUnit), ("ok-1", Category::PureUnit)]);

    let summary = runner(dir.path()).run(&requested).await.unwrap();

    let slow = summary.results.iter().find(|o| o.id.as_str() == "slow-1").unwrap();
    assert_eq!(slow.status, OutcomeStatus::TimedOut);
    assert_eq!(summary.passed, 1);
}

#[tokio::test]
async fn conflicting_categories_abort_the_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let requested = selection(&[("dup", Category::PureUnit), ("dup", Category::EndToEnd)]);

    let err = runner(dir.path()).run(&requested).await.unwrap_err();
    assert!(matches!(err, RunnerError::ConflictingCategory { .. }));
}

#[tokio::test]
async fn unreachable_service_fails_its_partition_only() {
    let dir = tempfile::tempdir().unwrap();
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let config = RunnerConfig::default()
        .with_category(Category::PureUnit, sh_category(4, 5, None))
        .with_category(Category::ServiceIntegration, sh_category(2, 5, Some("db")))
        .with_service(
            "db",
            ServiceConfig {
                startup_timeout_secs: 0,
                ..ServiceConfig::at(closed)
            },
        );
    let runner = ProcessCheckRunner::new(config, dir.path());
    let requested = selection(&[
        ("i1", Category::ServiceIntegration),
        ("i2", Category::ServiceIntegration),
        ("u1", Category::PureUnit),
    ]);

    let summary = runner.run(&requested).await.unwrap();

    assert_eq!(summary.total, 3);
    let unavailable: Vec<_> = summary
        .results
        .iter()
        .filter(|o| o.status == OutcomeStatus::ServiceUnavailable)
        .collect();
    assert_eq!(unavailable.len(), 2);
    assert!(unavailable.iter().all(|o| o.category == Category::ServiceIntegration));
    assert_eq!(summary.passed, 1);
}

#[tokio::test]
async fn parallelism_one_serializes_a_category() {
    let dir = tempfile::tempdir().unwrap();
    // Each check holds an exclusive lock directory while it runs
    let exclusive = CategoryConfig {
        command: vec![
            "sh".into(),
            "-c".into(),
            "mkdir held || exit 1; sleep 0.2; rmdir held".into(),
        ],
        parallelism: 1,
        timeout_secs: 10,
        service: None,
    };
    let runner = ProcessCheckRunner::new(
        RunnerConfig::default().with_category(Category::EndToEnd, exclusive),
        dir.path(),
    );
    let requested = selection(&[
        ("e1", Category::EndToEnd),
        ("e2", Category::EndToEnd),
        ("e3", Category::EndToEnd),
    ]);

    let summary = runner.run(&requested).await.unwrap();
    assert_eq!(summary.passed, 3, "{}", summary.render_human());
}

#[tokio::test]
async fn missing_program_is_an_error_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let broken = CategoryConfig {
        command: vec!["definitely-not-a-real-program-xyz".into(), "{id}".into()],
        ..sh_category(1, 5, None)
    };
    let runner = ProcessCheckRunner::new(
        RunnerConfig::default().with_category(Category::PureUnit, broken),
        dir.path(),
    );

    let summary = runner
        .run(&selection(&[("u1", Category::PureUnit)]))
        .await
        .unwrap();
    assert_eq!(summary.results[0].status, OutcomeStatus::Error);
}
