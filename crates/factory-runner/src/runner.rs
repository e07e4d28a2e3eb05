//! Check runner abstraction

use crate::error::RunnerError;
use crate::outcome::RunSummary;
use async_trait::async_trait;
use factory_registry::CheckRef;
use std::collections::BTreeSet;

/// Executes a selection of checks
///
/// Implementations must return exactly one outcome per requested check and
/// report failures inside a check as outcomes. `Err` is reserved for
/// problems with the invocation itself, such as a malformed selection.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Run every check in `selection`
    ///
    /// # Errors
    /// Fatal [`RunnerError`]s that abort the whole invocation.
    async fn run(&self, selection: &BTreeSet<CheckRef>) -> Result<RunSummary, RunnerError>;
}
