//! Check manifest
//!
//! Written by the phases that author checks. Lists every check they
//! introduced together with its category, the file holding it, and the
//! requirement it verifies. JSON by default; `.yaml`/`.yml` files are read
//! as YAML.
//!
//! ```json
//! {"checks": [{"id": "tests/unit/test_auth.py::test_login",
//!              "category": "pure-unit",
//!              "file": "tests/unit/test_auth.py",
//!              "requirement": "REQ-001"}]}
//! ```

use factory_registry::{Category, CheckId, CheckRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parsed manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckManifest {
    pub checks: Vec<ManifestEntry>,
}

/// One declared check
///
/// The category stays a string here so an unknown category is reported as a
/// rule violation instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    pub id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
}

impl ManifestEntry {
    /// Typed reference, if the category is known
    #[must_use]
    pub fn check_ref(&self) -> Option<CheckRef> {
        self.category
            .parse::<Category>()
            .ok()
            .map(|category| CheckRef::new(self.id.as_str(), category))
    }
}

impl CheckManifest {
    /// Read and parse a manifest file
    ///
    /// # Errors
    /// A human-readable reason when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| format!("invalid YAML: {e}"))
        } else {
            serde_json::from_str(&raw).map_err(|e| format!("invalid JSON: {e}"))
        }
    }

    /// Declared ids grouped by category, skipping entries with unknown categories
    #[must_use]
    pub fn by_category(&self) -> BTreeMap<Category, Vec<CheckId>> {
        let mut out: BTreeMap<Category, Vec<CheckId>> = BTreeMap::new();
        for check in self.checks.iter().filter_map(ManifestEntry::check_ref) {
            out.entry(check.category).or_default().push(check.id);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("manifest.json");
        std::fs::write(
            &json,
            r#"{"checks": [{"id": "t1", "category": "pure-unit", "requirement": "REQ-001"}]}"#,
        )
        .unwrap();
        let yaml = dir.path().join("manifest.yaml");
        std::fs::write(&yaml, "checks:\n  - id: t1\n    category: pure-unit\n    requirement: REQ-001\n")
            .unwrap();

        let a = CheckManifest::load(&json).unwrap();
        let b = CheckManifest::load(&yaml).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.by_category()[&Category::PureUnit], vec![CheckId::new("t1")]);
    }

    #[test]
    fn unknown_category_is_kept_but_not_typed() {
        let entry = ManifestEntry {
            id: "t".into(),
            category: "smoke".into(),
            file: None,
            requirement: None,
        };
        assert!(entry.check_ref().is_none());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(CheckManifest::load(&path).unwrap_err().starts_with("invalid JSON"));
    }
}
