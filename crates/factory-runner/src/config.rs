//! Runner configuration
//!
//! Deserialized from the `[runner.<category>]` and `[services.<name>]` tables
//! of the factory configuration. Categories without a table fall back to
//! [`CategoryConfig::default_for`].

use factory_registry::Category;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Placeholder replaced by the check id in command templates
pub const ID_PLACEHOLDER: &str = "{id}";

/// How checks of one category are executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryConfig {
    /// Argument vector; every `{id}` is replaced by the check id
    pub command: Vec<String>,
    /// Worker pool size
    pub parallelism: usize,
    /// Per-check timeout in seconds
    pub timeout_secs: u64,
    /// Service that must be reachable before any check runs
    #[serde(default)]
    pub service: Option<String>,
}

impl CategoryConfig {
    /// Built-in settings for a category
    #[must_use]
    pub fn default_for(category: Category) -> Self {
        let (parallelism, service) = match category {
            Category::PureUnit => (8, None),
            Category::ServiceIntegration => (2, Some("database".to_string())),
            Category::EndToEnd => (1, Some("app".to_string())),
        };
        Self {
            command: vec!["pytest".into(), "-q".into(), ID_PLACEHOLDER.into()],
            parallelism,
            timeout_secs: 300,
            service,
        }
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Command with the placeholder substituted
    #[must_use]
    pub fn argv_for(&self, id: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(ID_PLACEHOLDER, id))
            .collect()
    }
}

/// External dependency of a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// `host:port` checked with a TCP connect
    pub address: String,
    /// Run when the connect fails; never torn down afterwards
    #[serde(default)]
    pub start_command: Option<Vec<String>>,
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    500
}

impl ServiceConfig {
    /// Service checked at `address` with default timings and no start command
    #[must_use]
    pub fn at(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            start_command: None,
            startup_timeout_secs: default_startup_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }

    #[inline]
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Complete runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Keyed by category name
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryConfig>,
    /// Keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let compose_up = Some(vec![
            "docker".to_string(),
            "compose".to_string(),
            "up".to_string(),
            "-d".to_string(),
        ]);
        let mut services = BTreeMap::new();
        services.insert(
            "database".to_string(),
            ServiceConfig {
                start_command: compose_up.clone(),
                ..ServiceConfig::at("127.0.0.1:5432")
            },
        );
        services.insert(
            "app".to_string(),
            ServiceConfig {
                start_command: compose_up,
                ..ServiceConfig::at("127.0.0.1:8000")
            },
        );
        Self {
            categories: BTreeMap::new(),
            services,
        }
    }
}

impl RunnerConfig {
    /// Settings for `category`, falling back to the built-in defaults
    #[must_use]
    pub fn category(&self, category: Category) -> CategoryConfig {
        self.categories
            .get(category.as_str())
            .cloned()
            .unwrap_or_else(|| CategoryConfig::default_for(category))
    }

    /// Category table keys that do not name a category
    #[must_use]
    pub fn unknown_categories(&self) -> Vec<&str> {
        self.categories
            .keys()
            .map(String::as_str)
            .filter(|k| k.parse::<Category>().is_err())
            .collect()
    }

    /// Override one category
    #[must_use]
    pub fn with_category(mut self, category: Category, config: CategoryConfig) -> Self {
        self.categories.insert(category.as_str().to_string(), config);
        self
    }

    /// Override one service
    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, config: ServiceConfig) -> Self {
        self.services.insert(name.into(), config);
        self
    }
}
