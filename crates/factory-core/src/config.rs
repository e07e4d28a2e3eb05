//! Factory configuration
//!
//! Read from `.factory/factory.toml` under the project root. Every section
//! and key is optional; a missing file means all defaults.
//!
//! ```toml
//! [paths]
//! registry = ".factory/test-registry.json"
//!
//! [runner.pure-unit]
//! command = ["cargo", "test", "{id}"]
//! parallelism = 8
//! timeout_secs = 300
//!
//! [services.database]
//! address = "127.0.0.1:5432"
//! start_command = ["docker", "compose", "up", "-d", "db"]
//!
//! [generation]
//! command = "claude"
//! args = ["--print"]
//! ```

use crate::error::FactoryError;
use factory_runner::{CategoryConfig, RunnerConfig, ServiceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Location of the config file relative to the project root
pub const CONFIG_FILE: &str = ".factory/factory.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactoryConfig {
    pub paths: PathsConfig,
    /// Keyed by category name
    pub runner: BTreeMap<String, CategoryConfig>,
    /// Keyed by service name; merged over the built-in services
    pub services: BTreeMap<String, ServiceConfig>,
    pub generation: GenerationConfig,
    pub strategy: StrategyConfig,
}

/// Document locations, relative to the project root unless absolute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub registry: PathBuf,
    pub state: PathBuf,
    pub artifacts: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry: PathBuf::from(".factory/test-registry.json"),
            state: PathBuf::from(".factory/state/current-run.json"),
            artifacts: PathBuf::from(".factory/artifacts"),
        }
    }
}

/// External content generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    /// Program receiving the request on stdin
    pub command: String,
    pub args: Vec<String>,
    /// Directory holding `<profile>.md` instruction files
    pub instruction_dir: PathBuf,
    /// Per-call bound
    pub timeout_secs: u64,
    /// Attempts of the implementation phase before giving up
    pub max_implementation_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            command: "factory-generate".to_string(),
            args: Vec::new(),
            instruction_dir: PathBuf::from(".claude/commands"),
            timeout_secs: 900,
            max_implementation_attempts: 3,
        }
    }
}

impl GenerationConfig {
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Thresholds of the strategy heuristic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    /// Ambiguity markers at or above this pick the alternate strategy
    pub ambiguity_threshold: usize,
    /// Scope above this picks the alternate strategy
    pub scope_threshold: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: 3,
            scope_threshold: 12,
        }
    }
}

impl FactoryConfig {
    /// Load the config of the project at `root`
    ///
    /// # Errors
    /// `FactoryError::Configuration` if the file exists but cannot be read,
    /// parsed, or validated.
    pub fn load(root: &Path) -> Result<Self, FactoryError> {
        Self::load_file(&root.join(CONFIG_FILE))
    }

    /// Load a specific config file; a missing file yields defaults
    ///
    /// # Errors
    /// See [`load`](Self::load).
    pub fn load_file(path: &Path) -> Result<Self, FactoryError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(FactoryError::Configuration(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        let config: Self = toml::from_str(&raw).map_err(|e| {
            FactoryError::Configuration(format!("invalid {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `FactoryError::Configuration` naming the first invalid setting.
    pub fn validate(&self) -> Result<(), FactoryError> {
        let runner = self.runner_config();
        if let Some(unknown) = runner.unknown_categories().first() {
            return Err(FactoryError::Configuration(format!(
                "[runner.{unknown}] does not name a check category"
            )));
        }
        for (name, category) in &self.runner {
            if category.command.is_empty() {
                return Err(FactoryError::Configuration(format!(
                    "[runner.{name}] command is empty"
                )));
            }
            if category.parallelism == 0 {
                return Err(FactoryError::Configuration(format!(
                    "[runner.{name}] parallelism must be at least 1"
                )));
            }
            if let Some(service) = &category.service {
                if !runner.services.contains_key(service) {
                    return Err(FactoryError::Configuration(format!(
                        "[runner.{name}] requires undefined service '{service}'"
                    )));
                }
            }
        }
        if self.generation.max_implementation_attempts == 0 {
            return Err(FactoryError::Configuration(
                "[generation] max_implementation_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Runner settings: built-in defaults overlaid with this file
    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        let mut config = RunnerConfig::default();
        config.categories.extend(self.runner.clone());
        config.services.extend(self.services.clone());
        config
    }

    /// `path` resolved against `root`
    #[must_use]
    pub fn resolve(root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        }
    }
}
