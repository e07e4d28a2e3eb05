//! Runner error types
//!
//! Failures inside a check are outcomes, not errors. Only problems with the
//! invocation itself surface here.

use factory_registry::{Category, CheckId, RegistryError};

/// Check runner error
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Selection contains an empty or malformed id
    #[error("malformed selection: {0}")]
    MalformedSelection(String),

    /// Same id requested under two categories
    #[error("check {id} selected under both {first} and {second}")]
    ConflictingCategory {
        /// Offending id
        id: CheckId,
        /// First category seen
        first: Category,
        /// Second category seen
        second: Category,
    },

    /// Explicit id is not in the registry
    #[error("check {0} is not registered")]
    UnknownCheck(CheckId),

    /// Backing service did not become reachable
    #[error("service {service} unavailable: {reason}")]
    ServiceUnavailable {
        /// Configured service name
        service: String,
        /// Connect or start failure
        reason: String,
    },

    /// Registry needed to resolve a selector could not be read
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RunnerError {
    /// Whether the error aborts the whole invocation
    ///
    /// Service unavailability is reported per check instead.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ServiceUnavailable { .. })
    }
}
