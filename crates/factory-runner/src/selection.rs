//! Check selection
//!
//! A selection is either one of the registry sets or a list of explicit ids.
//! Explicit ids may be qualified as `<category>:<id>`; a qualified id must
//! match the category the registry holds it under.

use crate::error::RunnerError;
use factory_registry::{Category, CheckId, CheckRef, Registry, RegistrySet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One selector on the runner surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every baseline check
    Baseline,
    /// Every new check
    New,
    /// Baseline and new
    All,
    /// A single id, optionally pinned to a category
    Explicit {
        id: CheckId,
        category: Option<Category>,
    },
}

impl Selector {
    /// Parse a command-line selector
    ///
    /// `BASELINE`, `NEW` and `ALL` are keywords; anything else is an id.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "BASELINE" => Self::Baseline,
            "NEW" => Self::New,
            "ALL" => Self::All,
            other => match other.split_once(':') {
                Some((prefix, rest)) => match prefix.parse::<Category>() {
                    Ok(category) => Self::Explicit {
                        id: CheckId::new(rest),
                        category: Some(category),
                    },
                    Err(_) => Self::Explicit {
                        id: CheckId::new(other),
                        category: None,
                    },
                },
                None => Self::Explicit {
                    id: CheckId::new(other),
                    category: None,
                },
            },
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => f.write_str("BASELINE"),
            Self::New => f.write_str("NEW"),
            Self::All => f.write_str("ALL"),
            Self::Explicit {
                id,
                category: Some(c),
            } => write!(f, "{c}:{id}"),
            Self::Explicit { id, category: None } => write!(f, "{id}"),
        }
    }
}

/// Resolve selectors against the registry into concrete check references
///
/// # Errors
/// - `RunnerError::UnknownCheck` if an explicit id is not registered
/// - any error from [`validate_selection`]
pub fn resolve(
    selectors: &[Selector],
    registry: &Registry,
) -> Result<BTreeSet<CheckRef>, RunnerError> {
    let mut out = BTreeSet::new();
    for selector in selectors {
        match selector {
            Selector::Baseline => out.extend(registry.query(RegistrySet::Baseline, None)),
            Selector::New => out.extend(registry.query(RegistrySet::New, None)),
            Selector::All => out.extend(registry.query_all()),
            Selector::Explicit {
                id,
                category: Some(category),
            } => {
                let check = CheckRef::new(id.clone(), *category);
                if !registry.contains(&check) {
                    return Err(RunnerError::UnknownCheck(id.clone()));
                }
                out.insert(check);
            }
            Selector::Explicit { id, category: None } => {
                let Some(category) = registry.categories_of(id).into_iter().next() else {
                    return Err(RunnerError::UnknownCheck(id.clone()));
                };
                out.insert(CheckRef::new(id.clone(), category));
            }
        }
    }
    validate_selection(&out)?;
    Ok(out)
}

/// Reject selections the runner cannot execute unambiguously
///
/// # Errors
/// - `RunnerError::MalformedSelection` for empty or padded ids
/// - `RunnerError::ConflictingCategory` when one id appears under two categories
pub fn validate_selection(selection: &BTreeSet<CheckRef>) -> Result<(), RunnerError> {
    let mut seen: BTreeMap<&CheckId, Category> = BTreeMap::new();
    for check in selection {
        if !check.id.is_well_formed() {
            return Err(RunnerError::MalformedSelection(format!(
                "invalid check id {:?}",
                check.id.as_str()
            )));
        }
        if let Some(first) = seen.insert(&check.id, check.category) {
            return Err(RunnerError::ConflictingCategory {
                id: check.id.clone(),
                first,
                second: check.category,
            });
        }
    }
    Ok(())
}

/// Split a selection by category
#[must_use]
pub fn partition(selection: &BTreeSet<CheckRef>) -> BTreeMap<Category, Vec<CheckRef>> {
    let mut parts: BTreeMap<Category, Vec<CheckRef>> = BTreeMap::new();
    for check in selection {
        parts.entry(check.category).or_default().push(check.clone());
    }
    parts
}
