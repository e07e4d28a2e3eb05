//! Check identifiers and categories
//!
//! A check is one executable verification unit. Its identifier is opaque to
//! the registry; its [`Category`] decides which runner strategy and which
//! external-service preconditions apply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Check category
///
/// Categories are mutually exclusive: a check belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Needs a running backing service (database, queue)
    ServiceIntegration,
    /// Self-contained, no shared external state
    PureUnit,
    /// Drives the whole system, usually through a browser endpoint
    EndToEnd,
}

impl Category {
    /// All categories in canonical order
    pub const ALL: [Category; 3] = [
        Category::ServiceIntegration,
        Category::PureUnit,
        Category::EndToEnd,
    ];

    /// Stable name used in persisted documents and config keys
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ServiceIntegration => "service-integration",
            Category::PureUnit => "pure-unit",
            Category::EndToEnd => "end-to-end",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service-integration" => Ok(Category::ServiceIntegration),
            "pure-unit" => Ok(Category::PureUnit),
            "end-to-end" => Ok(Category::EndToEnd),
            other => Err(UnknownCategory(other.to_string())),
        }
    }
}

/// Parse error for [`Category`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown check category: {0}")]
pub struct UnknownCategory(pub String);

/// Opaque check identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckId(String);

impl CheckId {
    /// Create a check id
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An id is well-formed when it is non-empty and carries no surrounding
    /// whitespace or control characters.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.trim() == self.0
            && !self.0.chars().any(char::is_control)
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CheckId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A check id annotated with its category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckRef {
    /// Identifier
    pub id: CheckId,
    /// Category the id belongs to
    pub category: Category,
}

impl CheckRef {
    /// Create a check reference
    #[inline]
    pub fn new(id: impl Into<CheckId>, category: Category) -> Self {
        Self {
            id: id.into(),
            category,
        }
    }
}

impl fmt::Display for CheckRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.category)
    }
}
