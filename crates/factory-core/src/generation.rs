//! Content generation
//!
//! Requirements, checks and implementation are produced by an external
//! collaborator behind [`ContentGenerator`]. Calls are bounded by a timeout
//! and retried once on transport failure before the run stops.

use crate::error::FactoryError;
use crate::phase::Phase;
use async_trait::async_trait;
use factory_gate::ArtifactSet;
use factory_registry::CheckRef;
use factory_runner::{CheckRunner, RunSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// What the generator is asked to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub phase_kind: Phase,
    /// Name of the instruction file, without extension
    pub instruction_profile: String,
    pub instruction_file: PathBuf,
    pub current_artifacts: ArtifactSet,
    /// Directory the generator should write new artifacts into
    pub output_dir: PathBuf,
    /// 1-based attempt number within a converging phase
    pub attempt: u32,
    /// Failures of the previous attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// What the generator produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub produced_artifacts: ArtifactSet,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl GenerationError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// External content generation service
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce artifacts for one phase
    ///
    /// # Errors
    /// [`GenerationError`] on transport failure or an unusable response.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;
}

/// Call `generator` with a timeout, retrying once on transport failure
///
/// # Errors
/// `FactoryError::Transport` after the retry, or immediately for
/// non-retryable failures.
pub async fn generate_with_retry(
    generator: &dyn ContentGenerator,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<GenerationResponse, FactoryError> {
    let mut retried = false;
    loop {
        let result = match tokio::time::timeout(timeout, generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        };
        match result {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && !retried => {
                tracing::warn!(phase = %request.phase_kind, error = %e, "generator failed, retrying once");
                retried = true;
            }
            Err(e) => {
                tracing::error!(phase = %request.phase_kind, error = %e, "generator failed");
                return Err(FactoryError::Transport {
                    phase: request.phase_kind,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Runs an external program per request
///
/// The request is written to stdin as JSON; the response is read from
/// stdout as JSON.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandGenerator {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl ContentGenerator for CommandGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| GenerationError::InvalidResponse(format!("cannot encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GenerationError::Transport(format!("cannot start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| GenerationError::Transport(format!("cannot send request: {e}")))?;
            // Dropping stdin closes the pipe so the program sees EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !output.status.success() {
            return Err(GenerationError::Transport(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))
    }
}

/// Outcome of a converging generation
#[derive(Debug, Clone)]
pub struct Convergence {
    /// Artifacts of every attempt, later attempts winning
    pub response: GenerationResponse,
    pub attempts: u32,
    /// Whether the last run had no failures
    pub converged: bool,
    pub last_run: RunSummary,
}

/// Repeats implementation until the selected checks pass or the attempt
/// budget runs out
///
/// The caller's gate judges only the final artifacts.
pub struct ConvergingGenerator<'a> {
    generator: &'a dyn ContentGenerator,
    runner: &'a dyn CheckRunner,
    max_attempts: u32,
    timeout: Duration,
}

impl<'a> ConvergingGenerator<'a> {
    #[must_use]
    pub fn new(
        generator: &'a dyn ContentGenerator,
        runner: &'a dyn CheckRunner,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            runner,
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// # Errors
    /// Transport failures and fatal runner errors.
    pub async fn converge(
        &self,
        mut request: GenerationRequest,
        selection: &BTreeSet<CheckRef>,
    ) -> Result<Convergence, FactoryError> {
        let mut artifacts = ArtifactSet::new();
        let mut notes = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            request.attempt = attempt;
            let response = generate_with_retry(self.generator, &request, self.timeout).await?;
            request.current_artifacts.extend(response.produced_artifacts.clone());
            artifacts.extend(response.produced_artifacts);
            if !response.notes.is_empty() {
                notes.push(response.notes);
            }

            let summary = self.runner.run(selection).await?;
            let converged = summary.failed == 0;
            tracing::info!(
                phase = %request.phase_kind,
                attempt,
                passed = summary.passed,
                failed = summary.failed,
                "implementation attempt finished"
            );

            if converged || attempt >= self.max_attempts {
                return Ok(Convergence {
                    response: GenerationResponse {
                        produced_artifacts: artifacts,
                        notes: notes.join("\n"),
                    },
                    attempts: attempt,
                    converged,
                    last_run: summary,
                });
            }

            let failures: Vec<String> = summary
                .failures()
                .map(|o| format!("{} [{}] {}: {}", o.id, o.category, o.status, o.detail))
                .collect();
            request.feedback = Some(failures.join("\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> GenerationRequest {
        GenerationRequest {
            phase_kind: Phase::Requirements,
            instruction_profile: "spec-to-requirements".into(),
            instruction_file: ".claude/commands/spec-to-requirements.md".into(),
            current_artifacts: ArtifactSet::new(),
            output_dir: "out".into(),
            attempt: 1,
            feedback: None,
        }
    }

    /// Fails with a transport error `failures` times, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContentGenerator for Flaky {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(GenerationError::Transport("connection reset".into()))
            } else {
                Ok(GenerationResponse::default())
            }
        }
    }

    #[tokio::test]
    async fn one_transport_failure_is_retried() {
        let flaky = Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        generate_with_retry(&flaky, &request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_transport_failure_is_fatal() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let err = generate_with_retry(&flaky, &request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FactoryError::Transport { phase: Phase::Requirements, .. }));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    }

    struct Hangs;

    #[async_trait]
    impl ContentGenerator for Hangs {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(GenerationResponse::default())
        }
    }

    #[tokio::test]
    async fn timeout_becomes_transport_error() {
        let err = generate_with_retry(&Hangs, &request(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no response within"));
    }

    #[tokio::test]
    async fn command_generator_speaks_json_over_stdio() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"cat > request.json; echo '{"produced_artifacts": {"requirements": "r.md"}, "notes": "ok"}'"#;
        let generator = CommandGenerator::new("sh", vec!["-c".into(), script.into()], dir.path());

        let response = generator.generate(&request()).await.unwrap();
        assert_eq!(response.produced_artifacts.get("requirements").unwrap(), std::path::Path::new("r.md"));

        let sent: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("request.json")).unwrap()).unwrap();
        assert_eq!(sent["phase_kind"], "REQUIREMENTS");
        assert_eq!(sent["instruction_profile"], "spec-to-requirements");
    }

    #[tokio::test]
    async fn command_generator_failure_is_transport() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".into(), "echo nope >&2; exit 2".into()],
            dir.path(),
        );
        let err = generator.generate(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("nope"));
    }
}
