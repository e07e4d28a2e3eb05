//! In-memory registry document
//!
//! [`Registry`] is a value: every mutation returns a new document so the
//! store can write it out whole and swap it in atomically.

use crate::check::{Category, CheckId, CheckRef};
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which half of the registry to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistrySet {
    /// Promoted, must-always-pass checks
    Baseline,
    /// Added this cycle, expected to fail until implementation lands
    New,
}

impl fmt::Display for RegistrySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrySet::Baseline => f.write_str("BASELINE"),
            RegistrySet::New => f.write_str("NEW"),
        }
    }
}

/// Baseline and new check sets, keyed by category
///
/// Invariant: `baseline[C] ∩ new[C] = ∅` for every category `C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    baseline: BTreeMap<Category, BTreeSet<CheckId>>,
    new: BTreeMap<Category, BTreeSet<CheckId>>,
}

impl Registry {
    /// Registry with every category present and empty
    #[must_use]
    pub fn empty() -> Self {
        let sets = || {
            Category::ALL
                .iter()
                .map(|c| (*c, BTreeSet::new()))
                .collect::<BTreeMap<_, _>>()
        };
        Self {
            baseline: sets(),
            new: sets(),
        }
    }

    fn side(&self, set: RegistrySet) -> &BTreeMap<Category, BTreeSet<CheckId>> {
        match set {
            RegistrySet::Baseline => &self.baseline,
            RegistrySet::New => &self.new,
        }
    }

    /// Ids of one set and category
    #[must_use]
    pub fn ids(&self, set: RegistrySet, category: Category) -> BTreeSet<CheckId> {
        self.side(set).get(&category).cloned().unwrap_or_default()
    }

    /// Query one set, optionally restricted to a category
    #[must_use]
    pub fn query(&self, set: RegistrySet, category: Option<Category>) -> BTreeSet<CheckRef> {
        self.side(set)
            .iter()
            .filter(|(c, _)| category.map_or(true, |wanted| **c == wanted))
            .flat_map(|(c, ids)| ids.iter().map(move |id| CheckRef::new(id.clone(), *c)))
            .collect()
    }

    /// Union of baseline and new
    #[must_use]
    pub fn query_all(&self) -> BTreeSet<CheckRef> {
        let mut all = self.query(RegistrySet::Baseline, None);
        all.extend(self.query(RegistrySet::New, None));
        all
    }

    /// Whether the reference resolves in either set
    #[must_use]
    pub fn contains(&self, check: &CheckRef) -> bool {
        [RegistrySet::Baseline, RegistrySet::New].iter().any(|set| {
            self.side(*set)
                .get(&check.category)
                .is_some_and(|ids| ids.contains(&check.id))
        })
    }

    /// Categories an id is registered under, across both sets
    #[must_use]
    pub fn categories_of(&self, id: &CheckId) -> BTreeSet<Category> {
        self.baseline
            .iter()
            .chain(self.new.iter())
            .filter(|(_, ids)| ids.contains(id))
            .map(|(c, _)| *c)
            .collect()
    }

    /// Number of ids across both sets
    #[must_use]
    pub fn len(&self) -> usize {
        self.baseline.values().chain(self.new.values()).map(BTreeSet::len).sum()
    }

    /// Whether both sets are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Document with `ids` appended to `new[category]`
    ///
    /// # Errors
    /// - `RegistryError::MalformedId` for empty or padded ids
    /// - `RegistryError::DuplicateCheck` when an id is already in `baseline[category]`
    /// - `RegistryError::CategoryConflict` when an id is registered under
    ///   another category, in either set
    pub fn with_new<I>(&self, category: Category, ids: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = CheckId>,
    {
        let baseline = self.ids(RegistrySet::Baseline, category);
        let mut next = self.clone();

        for id in ids {
            if !id.is_well_formed() {
                return Err(RegistryError::MalformedId(id.as_str().to_string()));
            }
            if baseline.contains(&id) {
                return Err(RegistryError::DuplicateCheck { category, id });
            }
            let elsewhere = self.categories_of(&id).into_iter().find(|c| *c != category);
            if let Some(registered) = elsewhere {
                return Err(RegistryError::CategoryConflict {
                    id,
                    registered,
                    requested: category,
                });
            }
            next.new.entry(category).or_default().insert(id);
        }

        Ok(next)
    }

    /// Document with every batch appended, or the first error
    ///
    /// Batches see the ids of earlier batches, so one id under two categories
    /// is rejected even when neither is registered yet.
    ///
    /// # Errors
    /// See [`with_new`](Self::with_new).
    pub fn with_new_batches<B, I>(&self, batches: B) -> Result<Self, RegistryError>
    where
        B: IntoIterator<Item = (Category, I)>,
        I: IntoIterator<Item = CheckId>,
    {
        batches
            .into_iter()
            .try_fold(self.clone(), |registry, (category, ids)| {
                registry.with_new(category, ids)
            })
    }

    /// Document with every `new[C]` merged into `baseline[C]` and cleared
    #[must_use]
    pub fn promoted(&self) -> Self {
        let mut next = self.clone();
        for (category, ids) in &mut next.new {
            next.baseline
                .entry(*category)
                .or_default()
                .extend(std::mem::take(ids));
        }
        next
    }

    /// References present in both baseline and new for the same category
    #[must_use]
    pub fn overlaps(&self) -> Vec<CheckRef> {
        self.new
            .iter()
            .flat_map(|(c, ids)| {
                ids.iter()
                    .filter(move |id| self.baseline.get(c).is_some_and(|b| b.contains(*id)))
                    .map(move |id| CheckRef::new(id.clone(), *c))
            })
            .collect()
    }

    pub(crate) fn to_file(&self) -> RegistryFile {
        let render = |side: &BTreeMap<Category, BTreeSet<CheckId>>| {
            side.iter()
                .map(|(c, ids)| {
                    (
                        c.as_str().to_string(),
                        ids.iter().map(|id| id.as_str().to_string()).collect(),
                    )
                })
                .collect()
        };
        RegistryFile {
            baseline: render(&self.baseline),
            new: render(&self.new),
        }
    }

    pub(crate) fn from_file(file: RegistryFile) -> Result<Self, String> {
        let parse = |side: BTreeMap<String, Vec<String>>| {
            let mut out: BTreeMap<Category, BTreeSet<CheckId>> = BTreeMap::new();
            for (name, ids) in side {
                let category: Category = name.parse().map_err(|e| format!("{e}"))?;
                let bucket = out.entry(category).or_default();
                for raw in ids {
                    let id = CheckId::new(raw);
                    if !id.is_well_formed() {
                        return Err(format!("malformed check id {:?} in {category}", id.as_str()));
                    }
                    bucket.insert(id);
                }
            }
            Ok::<_, String>(out)
        };

        let mut registry = Self::empty();
        registry.baseline.extend(parse(file.baseline)?);
        registry.new.extend(parse(file.new)?);

        let overlaps = registry.overlaps();
        if !overlaps.is_empty() {
            let listed: Vec<String> = overlaps.iter().map(ToString::to_string).collect();
            return Err(format!(
                "ids present in both baseline and new: {}",
                listed.join(", ")
            ));
        }

        let mut seen: BTreeMap<&CheckId, Category> = BTreeMap::new();
        for (category, ids) in registry.baseline.iter().chain(registry.new.iter()) {
            for id in ids {
                match seen.insert(id, *category) {
                    Some(first) if first != *category => {
                        return Err(format!(
                            "{id} registered under both {first} and {category}"
                        ));
                    }
                    _ => {}
                }
            }
        }

        Ok(registry)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Persisted shape: exactly two top-level keys
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RegistryFile {
    pub(crate) baseline: BTreeMap<String, Vec<String>>,
    pub(crate) new: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(raw: &[&str]) -> Vec<CheckId> {
        raw.iter().map(|s| CheckId::new(*s)).collect()
    }

    #[test]
    fn empty_registry_has_every_category() {
        let registry = Registry::empty();
        for category in Category::ALL {
            assert!(registry.ids(RegistrySet::Baseline, category).is_empty());
            assert!(registry.ids(RegistrySet::New, category).is_empty());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn with_new_rejects_baseline_collision() {
        let registry = Registry::empty()
            .with_new(Category::PureUnit, ids(&["a"]))
            .unwrap()
            .promoted();

        let err = registry
            .with_new(Category::PureUnit, ids(&["b", "a"]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCheck { .. }));
    }

    #[test]
    fn with_new_rejects_id_of_another_category() {
        let registry = Registry::empty()
            .with_new(Category::PureUnit, ids(&["a"]))
            .unwrap()
            .promoted()
            .with_new(Category::ServiceIntegration, ids(&["b"]))
            .unwrap();

        match registry.with_new(Category::EndToEnd, ids(&["a"])) {
            Err(RegistryError::CategoryConflict {
                registered,
                requested,
                ..
            }) => {
                assert_eq!(registered, Category::PureUnit);
                assert_eq!(requested, Category::EndToEnd);
            }
            other => panic!("expected CategoryConflict, got {other:?}"),
        }
        // Pending new ids count too
        assert!(matches!(
            registry.with_new(Category::PureUnit, ids(&["b"])),
            Err(RegistryError::CategoryConflict { .. })
        ));
        // Re-adding under the same category is idempotent
        assert_eq!(
            registry.with_new(Category::ServiceIntegration, ids(&["b"])).unwrap(),
            registry
        );
    }

    #[test]
    fn with_new_batches_is_all_or_nothing() {
        let registry = Registry::empty()
            .with_new(Category::PureUnit, ids(&["base"]))
            .unwrap()
            .promoted();

        let err = registry
            .with_new_batches([
                (Category::ServiceIntegration, ids(&["fresh"])),
                (Category::PureUnit, ids(&["base"])),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCheck { .. }));

        let err = registry
            .with_new_batches([
                (Category::ServiceIntegration, ids(&["x"])),
                (Category::EndToEnd, ids(&["x"])),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::CategoryConflict { .. }));

        let next = registry
            .with_new_batches([
                (Category::ServiceIntegration, ids(&["i1"])),
                (Category::EndToEnd, ids(&["e1"])),
            ])
            .unwrap();
        assert_eq!(next.query(RegistrySet::New, None).len(), 2);
    }

    #[test]
    fn promoted_merges_and_clears() {
        let registry = Registry::empty()
            .with_new(Category::ServiceIntegration, ids(&["x", "y"]))
            .unwrap();
        let promoted = registry.promoted();

        assert_eq!(
            promoted.ids(RegistrySet::Baseline, Category::ServiceIntegration),
            ids(&["x", "y"]).into_iter().collect()
        );
        assert!(promoted.query(RegistrySet::New, None).is_empty());
    }

    #[test]
    fn query_filters_by_category() {
        let registry = Registry::empty()
            .with_new(Category::PureUnit, ids(&["u1"]))
            .unwrap()
            .with_new(Category::EndToEnd, ids(&["e1"]))
            .unwrap();

        let unit = registry.query(RegistrySet::New, Some(Category::PureUnit));
        assert_eq!(unit.len(), 1);
        assert!(unit.contains(&CheckRef::new("u1", Category::PureUnit)));
        assert_eq!(registry.query_all().len(), 2);
    }

    #[test]
    fn from_file_rejects_overlap_and_unknown_category() {
        let overlapping = RegistryFile {
            baseline: [("pure-unit".to_string(), vec!["a".to_string()])].into(),
            new: [("pure-unit".to_string(), vec!["a".to_string()])].into(),
        };
        assert!(Registry::from_file(overlapping).is_err());

        let unknown = RegistryFile {
            baseline: [("smoke".to_string(), vec![])].into(),
            new: BTreeMap::new(),
        };
        assert!(Registry::from_file(unknown).is_err());
    }

    #[test]
    fn from_file_rejects_id_under_two_categories() {
        let split = RegistryFile {
            baseline: [("pure-unit".to_string(), vec!["a".to_string()])].into(),
            new: [("end-to-end".to_string(), vec!["a".to_string()])].into(),
        };
        let reason = Registry::from_file(split).unwrap_err();
        assert!(reason.contains("pure-unit") && reason.contains("end-to-end"));
    }
}
