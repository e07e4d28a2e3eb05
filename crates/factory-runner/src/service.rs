//! External service supervision
//!
//! Services are checked with a TCP connect on every request. When the connect
//! fails the configured start command is launched, at most once per
//! supervisor, and the address is polled until the startup timeout elapses.
//! A start command may stay in the foreground; it is only killed when the
//! service never becomes reachable. Services are never stopped otherwise.

use crate::config::ServiceConfig;
use crate::error::RunnerError;
use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

/// Upper bound for a single connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts and health-waits the services required by check categories
#[derive(Debug)]
pub struct ServiceSupervisor {
    services: BTreeMap<String, ServiceConfig>,
    /// Services whose start command was already launched
    started: Mutex<BTreeSet<String>>,
}

impl ServiceSupervisor {
    #[must_use]
    pub fn new(services: BTreeMap<String, ServiceConfig>) -> Self {
        Self {
            services,
            started: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make sure `name` is reachable, starting it if needed
    ///
    /// Concurrent callers are serialized so a service is started at most once.
    /// The whole wait, start command included, is bounded by the service's
    /// startup timeout.
    ///
    /// # Errors
    /// `RunnerError::ServiceUnavailable` if the service is unknown, its start
    /// command fails, or it is still unreachable after the startup timeout.
    pub async fn ensure(&self, name: &str) -> Result<(), RunnerError> {
        let mut started = self.started.lock().await;

        let config = self
            .services
            .get(name)
            .ok_or_else(|| unavailable(name, "no service configuration"))?;

        if reachable(&config.address).await {
            tracing::debug!(service = name, address = %config.address, "service reachable");
            return Ok(());
        }

        let deadline = Instant::now() + config.startup_timeout();
        let mut child = match &config.start_command {
            Some(start) if !started.contains(name) => {
                tracing::info!(service = name, command = ?start, "starting service");
                let child = spawn_start(name, start)?;
                started.insert(name.to_string());
                Some(child)
            }
            _ => None,
        };

        loop {
            if reachable(&config.address).await {
                tracing::info!(service = name, "service became reachable");
                return Ok(());
            }
            if let Some(running) = child.as_mut() {
                match running.try_wait() {
                    Ok(Some(status)) if !status.success() => {
                        return Err(unavailable(
                            name,
                            format!("start command exited with {status}"),
                        ));
                    }
                    Ok(Some(_)) => child = None,
                    Ok(None) => {}
                    Err(e) => {
                        return Err(unavailable(
                            name,
                            format!("cannot wait for start command: {e}"),
                        ));
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(config.poll_interval().min(deadline - now)).await;
        }

        if let Some(mut running) = child {
            if let Err(e) = running.start_kill() {
                tracing::debug!(service = name, error = %e, "start command already gone");
            }
        }
        tracing::warn!(
            service = name,
            timeout_secs = config.startup_timeout_secs,
            "service did not become reachable"
        );
        Err(unavailable(
            name,
            format!(
                "{} not reachable after {}s",
                config.address, config.startup_timeout_secs
            ),
        ))
    }
}

async fn reachable(address: &str) -> bool {
    matches!(
        timeout(CONNECT_TIMEOUT, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Launch the start command without waiting for it
fn spawn_start(name: &str, argv: &[String]) -> Result<Child, RunnerError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(unavailable(name, "empty start command"));
    };
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| unavailable(name, format!("cannot run start command: {e}")))
}

fn unavailable(service: &str, reason: impl Into<String>) -> RunnerError {
    RunnerError::ServiceUnavailable {
        service: service.to_string(),
        reason: reason.into(),
    }
}
