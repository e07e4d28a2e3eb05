//! Gate error types

use factory_runner::RunnerError;

/// Failure to reach a verdict
///
/// A blocked gate is a [`GateResult`](crate::GateResult), not an error.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The runner aborted the dynamic checks
    #[error("check runner failed: {0}")]
    Runner(#[from] RunnerError),
}
