//! Process-backed check runner
//!
//! Each check is one child process built from its category's command
//! template. Categories run concurrently; within a category a semaphore
//! bounds the number of live processes.

use crate::config::{CategoryConfig, RunnerConfig};
use crate::error::RunnerError;
use crate::outcome::{CheckOutcome, OutcomeStatus, RunSummary};
use crate::runner::CheckRunner;
use crate::selection::{partition, validate_selection};
use crate::service::ServiceSupervisor;
use async_trait::async_trait;
use factory_registry::{Category, CheckRef};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Runs checks as child processes of the current working tree
#[derive(Debug)]
pub struct ProcessCheckRunner {
    config: RunnerConfig,
    working_dir: PathBuf,
    supervisor: ServiceSupervisor,
}

impl ProcessCheckRunner {
    /// Runner executing commands from `working_dir`
    #[must_use]
    pub fn new(config: RunnerConfig, working_dir: impl Into<PathBuf>) -> Self {
        let supervisor = ServiceSupervisor::new(config.services.clone());
        Self {
            config,
            working_dir: working_dir.into(),
            supervisor,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn run_category(
        &self,
        category: Category,
        checks: Vec<CheckRef>,
    ) -> Result<Vec<CheckOutcome>, RunnerError> {
        let config = self.config.category(category);

        if let Some(service) = &config.service {
            if let Err(err) = self.supervisor.ensure(service).await {
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(%category, %service, checks = checks.len(), "failing partition, service unavailable");
                let reason = err.to_string();
                return Ok(checks
                    .iter()
                    .map(|c| CheckOutcome::failed(c, OutcomeStatus::ServiceUnavailable, reason.clone()))
                    .collect());
            }
        }

        let pool = Semaphore::new(config.parallelism.max(1));
        tracing::debug!(%category, checks = checks.len(), parallelism = config.parallelism, "running partition");

        let outcomes = join_all(checks.iter().map(|check| {
            let pool = &pool;
            let config = &config;
            async move {
                let Ok(_permit) = pool.acquire().await else {
                    return CheckOutcome::failed(check, OutcomeStatus::Error, "worker pool closed");
                };
                execute(check, config, &self.working_dir).await
            }
        }))
        .await;

        Ok(outcomes)
    }
}

#[async_trait]
impl CheckRunner for ProcessCheckRunner {
    async fn run(&self, selection: &BTreeSet<CheckRef>) -> Result<RunSummary, RunnerError> {
        validate_selection(selection)?;
        if selection.is_empty() {
            return Ok(RunSummary::default());
        }

        let parts = partition(selection);
        tracing::info!(checks = selection.len(), categories = parts.len(), "running checks");

        let results = join_all(
            parts
                .into_iter()
                .map(|(category, checks)| self.run_category(category, checks)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(selection.len());
        for result in results {
            outcomes.extend(result?);
        }

        let summary = RunSummary::from_outcomes(outcomes);
        tracing::info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "check run finished"
        );
        Ok(summary)
    }
}

async fn execute(check: &CheckRef, config: &CategoryConfig, working_dir: &Path) -> CheckOutcome {
    let argv = config.argv_for(check.id.as_str());
    let Some((program, args)) = argv.split_first() else {
        return CheckOutcome::failed(check, OutcomeStatus::Error, "empty command template");
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(working_dir)
        .env("FACTORY_CHECK_ID", check.id.as_str())
        .env("FACTORY_CHECK_CATEGORY", check.category.as_str())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match timeout(config.timeout(), command.output()).await {
        Err(_) => {
            tracing::warn!(check = %check, timeout_secs = config.timeout_secs, "check timed out");
            CheckOutcome::failed(
                check,
                OutcomeStatus::TimedOut,
                format!("killed after {}s", config.timeout_secs),
            )
        }
        Ok(Err(e)) => CheckOutcome::failed(
            check,
            OutcomeStatus::Error,
            format!("cannot run {program}: {e}"),
        ),
        Ok(Ok(output)) if output.status.success() => CheckOutcome::passed(check),
        Ok(Ok(output)) => {
            tracing::debug!(check = %check, status = %output.status, "check failed");
            CheckOutcome::failed(check, OutcomeStatus::Failed, excerpt(&output))
        }
    }
}

/// Stderr followed by stdout, whichever is non-empty
fn excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut detail = String::new();
    for part in [stderr.trim(), stdout.trim()] {
        if !part.is_empty() {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(part);
        }
    }
    if detail.is_empty() {
        detail = format!("exited with {}", output.status);
    }
    detail
}
