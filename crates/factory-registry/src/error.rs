//! Error types for the check registry

use crate::check::{Category, CheckId};
use std::path::PathBuf;

/// Registry error type
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Document exists but cannot be understood
    #[error("registry document {path} is corrupt: {reason}")]
    Corrupt {
        /// Location of the document
        path: PathBuf,
        /// Parse or validation failure
        reason: String,
    },

    /// Id is already part of the baseline for that category
    #[error("check {id} already exists in baseline[{category}]")]
    DuplicateCheck {
        /// Category the collision happened in
        category: Category,
        /// Colliding id
        id: CheckId,
    },

    /// Id is already registered under a different category
    #[error("check {id} is registered under {registered}; cannot add it under {requested}")]
    CategoryConflict {
        /// Offending id
        id: CheckId,
        /// Category the registry already holds it under
        registered: Category,
        /// Category of the rejected addition
        requested: Category,
    },

    /// Id is empty or carries whitespace/control characters
    #[error("malformed check id {0:?}")]
    MalformedId(String),

    /// Read or atomic write failed
    #[error("registry I/O on {path}: {source}")]
    Io {
        /// Location of the document
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Configuration-class errors need a human to fix the document
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
