//! Named phase artifacts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Requirements document produced from the human spec
pub const REQUIREMENTS: &str = "requirements";
/// Declares the checks a phase authored
pub const CHECK_MANIFEST: &str = "check-manifest";
/// Implementation produced by a generation phase
pub const IMPLEMENTATION: &str = "implementation";
/// Copy of the human spec taken at ingest
pub const SPEC: &str = "spec";

/// Artifact name to path
///
/// Relative paths resolve against a base directory supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet(BTreeMap<String, PathBuf>);

impl ArtifactSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or replace an artifact
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(name.into(), path.into());
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(name, path);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.0.get(name).map(PathBuf::as_path)
    }

    /// Path of `name` joined onto `base` when relative
    #[must_use]
    pub fn resolve(&self, name: &str, base: &Path) -> Option<PathBuf> {
        self.get(name).map(|p| resolve_path(base, p))
    }

    /// Merge `other` over `self`
    pub fn extend(&mut self, other: ArtifactSet) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, PathBuf)> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = (String, PathBuf)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `path` joined onto `base` unless already absolute
#[must_use]
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
