//! Static gate rules
//!
//! Rules inspect artifacts on disk and the registry without running
//! anything. Each rule declares the gates it applies to.

use crate::artifacts::{resolve_path, ArtifactSet, CHECK_MANIFEST, REQUIREMENTS};
use crate::manifest::CheckManifest;
use crate::requirements::requirement_ids;
use crate::result::GateKind;
use crate::violation::{Severity, Violation};
use factory_registry::{Category, CheckId, Registry};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Inputs shared by every rule of one evaluation
///
/// The manifest and requirements are read once up front.
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub gate: GateKind,
    pub artifacts: &'a ArtifactSet,
    pub registry: &'a Registry,
    pub base_dir: &'a Path,
    manifest: Option<Result<CheckManifest, String>>,
    requirements: Option<String>,
}

impl<'a> RuleContext<'a> {
    #[must_use]
    pub fn new(
        gate: GateKind,
        artifacts: &'a ArtifactSet,
        registry: &'a Registry,
        base_dir: &'a Path,
    ) -> Self {
        let manifest = artifacts
            .resolve(CHECK_MANIFEST, base_dir)
            .filter(|p| p.exists())
            .map(|p| CheckManifest::load(&p));
        let requirements = artifacts
            .resolve(REQUIREMENTS, base_dir)
            .and_then(|p| std::fs::read_to_string(p).ok());
        Self {
            gate,
            artifacts,
            registry,
            base_dir,
            manifest,
            requirements,
        }
    }

    /// Parsed manifest, if present and valid
    #[must_use]
    pub fn manifest(&self) -> Option<&CheckManifest> {
        self.manifest.as_ref().and_then(|m| m.as_ref().ok())
    }

    #[must_use]
    pub fn manifest_error(&self) -> Option<&str> {
        self.manifest
            .as_ref()
            .and_then(|m| m.as_ref().err())
            .map(String::as_str)
    }

    #[must_use]
    pub fn requirements(&self) -> Option<&str> {
        self.requirements.as_deref()
    }
}

/// A static validation rule
pub trait StaticRule: Send + Sync {
    /// Stable rule name reported in violations
    fn name(&self) -> &'static str;

    fn applies_to(&self, gate: GateKind) -> bool;

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation>;
}

/// Every built-in rule
#[must_use]
pub fn default_rules() -> Vec<Box<dyn StaticRule>> {
    vec![
        Box::new(ArtifactPresent),
        Box::new(ManifestParse),
        Box::new(DeclaredCheckResolvable),
        Box::new(CrossCategoryReference),
        Box::new(RegistryResolvable),
        Box::new(RequirementTraceability),
        Box::new(ScopeCreep),
    ]
}

/// Required artifacts exist on disk
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactPresent;

impl ArtifactPresent {
    fn required(gate: GateKind) -> &'static [&'static str] {
        match gate {
            GateKind::PreGeneration => &[REQUIREMENTS],
            GateKind::PostTestAuthoring => &[CHECK_MANIFEST],
            GateKind::PostImplementation => &[],
        }
    }
}

impl StaticRule for ArtifactPresent {
    fn name(&self) -> &'static str {
        "artifact-present"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        !Self::required(gate).is_empty()
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        Self::required(ctx.gate)
            .iter()
            .filter_map(|name| {
                let description = match ctx.artifacts.resolve(name, ctx.base_dir) {
                    None => format!("artifact '{name}' was not produced"),
                    Some(path) if !path.is_file() => {
                        format!("artifact '{name}' missing at {}", path.display())
                    }
                    Some(_) => return None,
                };
                Some(
                    Violation::new(self.name(), Severity::Critical, *name, description)
                        .with_remediation(format!("re-run the phase that produces '{name}'")),
                )
            })
            .collect()
    }
}

/// The check manifest parses
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestParse;

impl StaticRule for ManifestParse {
    fn name(&self) -> &'static str {
        "manifest-parse"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        matches!(gate, GateKind::PostTestAuthoring | GateKind::PostImplementation)
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        ctx.manifest_error()
            .map(|reason| {
                Violation::new(self.name(), Severity::Critical, CHECK_MANIFEST, reason)
                    .with_remediation("rewrite the manifest as {\"checks\": [{\"id\", \"category\", ...}]}")
            })
            .into_iter()
            .collect()
    }
}

/// Each declared check has a known category, a well-formed id, and an
/// existing file
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredCheckResolvable;

impl StaticRule for DeclaredCheckResolvable {
    fn name(&self) -> &'static str {
        "declared-check-resolvable"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        matches!(gate, GateKind::PostTestAuthoring | GateKind::PostImplementation)
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(manifest) = ctx.manifest() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in &manifest.checks {
            if !CheckId::new(entry.id.as_str()).is_well_formed() {
                out.push(
                    Violation::new(
                        self.name(),
                        Severity::Error,
                        format!("{CHECK_MANIFEST}: {:?}", entry.id),
                        "check id is empty or padded",
                    )
                    .with_remediation("use the runner's exact check identifier"),
                );
            }
            if entry.category.parse::<Category>().is_err() {
                out.push(
                    Violation::new(
                        self.name(),
                        Severity::Error,
                        entry.id.as_str(),
                        format!("unknown category '{}'", entry.category),
                    )
                    .with_remediation("use service-integration, pure-unit or end-to-end"),
                );
            }
            if let Some(file) = &entry.file {
                let path = resolve_path(ctx.base_dir, file);
                if !path.is_file() {
                    out.push(
                        Violation::new(
                            self.name(),
                            Severity::Error,
                            entry.id.as_str(),
                            format!("declared file {} does not exist", file.display()),
                        )
                        .with_remediation("write the check file or fix its path in the manifest"),
                    );
                }
            }
        }
        out
    }
}

/// A check may belong to only one category
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossCategoryReference;

impl StaticRule for CrossCategoryReference {
    fn name(&self) -> &'static str {
        "cross-category-reference"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        matches!(gate, GateKind::PostTestAuthoring | GateKind::PostImplementation)
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(manifest) = ctx.manifest() else {
            return Vec::new();
        };

        let mut declared: BTreeMap<CheckId, BTreeSet<Category>> = BTreeMap::new();
        for check in manifest.checks.iter().filter_map(|e| e.check_ref()) {
            declared.entry(check.id).or_default().insert(check.category);
        }

        let mut out = Vec::new();
        for (id, categories) in &declared {
            if categories.len() > 1 {
                let names: Vec<&str> = categories.iter().map(Category::as_str).collect();
                out.push(
                    Violation::new(
                        self.name(),
                        Severity::Error,
                        id.as_str(),
                        format!("declared under several categories: {}", names.join(", ")),
                    )
                    .with_remediation("declare each check under exactly one category"),
                );
                continue;
            }
            let registered = ctx.registry.categories_of(id);
            if let Some(declared_as) = categories.iter().next() {
                if !registered.is_empty() && !registered.contains(declared_as) {
                    let names: Vec<&str> = registered.iter().map(Category::as_str).collect();
                    out.push(
                        Violation::new(
                            self.name(),
                            Severity::Error,
                            id.as_str(),
                            format!(
                                "declared as {declared_as} but registered as {}",
                                names.join(", ")
                            ),
                        )
                        .with_remediation("align the manifest category with the registry"),
                    );
                }
            }
        }
        out
    }
}

/// Declared checks must be registered
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryResolvable;

impl StaticRule for RegistryResolvable {
    fn name(&self) -> &'static str {
        "registry-resolvable"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        matches!(gate, GateKind::PostTestAuthoring | GateKind::PostImplementation)
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(manifest) = ctx.manifest() else {
            return Vec::new();
        };
        manifest
            .checks
            .iter()
            .filter_map(|e| e.check_ref())
            .filter(|check| !ctx.registry.contains(check))
            .map(|check| {
                Violation::new(
                    self.name(),
                    Severity::Error,
                    check.to_string(),
                    "declared check is not in the registry",
                )
                .with_remediation("register the check in the new set before evaluating the gate")
            })
            .collect()
    }
}

/// Requirements carry `REQ-NNN` ids, and manifest entries point at real ones
#[derive(Debug, Clone, Copy, Default)]
pub struct RequirementTraceability;

impl StaticRule for RequirementTraceability {
    fn name(&self) -> &'static str {
        "requirement-traceability"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        matches!(gate, GateKind::PreGeneration | GateKind::PostTestAuthoring)
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(text) = ctx.requirements() else {
            return Vec::new();
        };
        let known = requirement_ids(text);

        match ctx.gate {
            GateKind::PreGeneration if known.is_empty() => vec![Violation::new(
                self.name(),
                Severity::Error,
                REQUIREMENTS,
                "no requirement ids (REQ-NNN) found",
            )
            .with_remediation("label each requirement with a unique REQ-NNN id")],
            GateKind::PostTestAuthoring => ctx
                .manifest()
                .map(|m| {
                    m.checks
                        .iter()
                        .filter_map(|e| e.requirement.as_ref().map(|r| (e, r)))
                        .filter(|(_, req)| !known.contains(req.as_str()))
                        .map(|(entry, req)| {
                            Violation::new(
                                self.name(),
                                Severity::Error,
                                entry.id.as_str(),
                                format!("traces to unknown requirement {req}"),
                            )
                            .with_remediation("reference a requirement id present in the requirements")
                        })
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Requirements drifting beyond what was asked for
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeCreep;

const SCOPE_CREEP_PHRASES: &[&str] = &[
    "while we're at it",
    "while we are at it",
    "might as well",
    "nice to have",
    "as a bonus",
    "future-proof",
];

impl StaticRule for ScopeCreep {
    fn name(&self) -> &'static str {
        "scope-creep"
    }

    fn applies_to(&self, gate: GateKind) -> bool {
        gate == GateKind::PreGeneration
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Violation> {
        let Some(text) = ctx.requirements() else {
            return Vec::new();
        };
        text.lines()
            .enumerate()
            .filter_map(|(n, line)| {
                let lower = line.to_lowercase();
                SCOPE_CREEP_PHRASES
                    .iter()
                    .find(|p| lower.contains(*p))
                    .map(|phrase| {
                        Violation::new(
                            self.name(),
                            Severity::Warning,
                            format!("{REQUIREMENTS}:{}", n + 1),
                            format!("'{phrase}' suggests work beyond the spec"),
                        )
                        .with_remediation("move the extra work to a separate feature")
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactSet;
    use factory_registry::CheckRef;

    struct Fixture {
        dir: tempfile::TempDir,
        artifacts: ArtifactSet,
        registry: Registry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                artifacts: ArtifactSet::new(),
                registry: Registry::empty(),
            }
        }

        fn write(&mut self, name: &str, file: &str, body: &str) {
            std::fs::write(self.dir.path().join(file), body).unwrap();
            self.artifacts.insert(name, file);
        }

        fn run(&self, rule: &dyn StaticRule, gate: GateKind) -> Vec<Violation> {
            let ctx = RuleContext::new(gate, &self.artifacts, &self.registry, self.dir.path());
            rule.check(&ctx)
        }
    }

    #[test]
    fn artifact_present_flags_missing_requirements() {
        let mut fx = Fixture::new();
        let v = fx.run(&ArtifactPresent, GateKind::PreGeneration);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].severity, Severity::Critical);

        fx.artifacts.insert(REQUIREMENTS, "gone.md");
        assert!(fx.run(&ArtifactPresent, GateKind::PreGeneration)[0]
            .description
            .contains("missing at"));

        fx.write(REQUIREMENTS, "r.md", "REQ-001 x");
        assert!(fx.run(&ArtifactPresent, GateKind::PreGeneration).is_empty());
    }

    #[test]
    fn manifest_parse_is_critical() {
        let mut fx = Fixture::new();
        fx.write(CHECK_MANIFEST, "m.json", "{oops");
        let v = fx.run(&ManifestParse, GateKind::PostTestAuthoring);
        assert_eq!(v[0].severity, Severity::Critical);
    }

    #[test]
    fn declared_checks_need_known_category_and_file() {
        let mut fx = Fixture::new();
        fx.write(
            CHECK_MANIFEST,
            "m.json",
            r#"{"checks": [
                {"id": "a", "category": "smoke"},
                {"id": "b", "category": "pure-unit", "file": "tests/b.py"}
            ]}"#,
        );
        let v = fx.run(&DeclaredCheckResolvable, GateKind::PostTestAuthoring);
        assert_eq!(v.len(), 2);
        assert!(v.iter().all(|v| v.severity == Severity::Error));
    }

    #[test]
    fn cross_category_detects_double_declaration_and_registry_mismatch() {
        let mut fx = Fixture::new();
        fx.registry = Registry::empty()
            .with_new(Category::EndToEnd, [CheckId::new("c")])
            .unwrap();
        fx.write(
            CHECK_MANIFEST,
            "m.json",
            r#"{"checks": [
                {"id": "a", "category": "pure-unit"},
                {"id": "a", "category": "end-to-end"},
                {"id": "c", "category": "pure-unit"}
            ]}"#,
        );
        let v = fx.run(&CrossCategoryReference, GateKind::PostImplementation);
        let locations: Vec<&str> = v.iter().map(|v| v.location.as_str()).collect();
        assert_eq!(locations, vec!["a", "c"]);
    }

    #[test]
    fn registry_resolvable_requires_registration() {
        let mut fx = Fixture::new();
        fx.registry = Registry::empty()
            .with_new(Category::PureUnit, [CheckId::new("known")])
            .unwrap();
        fx.write(
            CHECK_MANIFEST,
            "m.json",
            r#"{"checks": [
                {"id": "known", "category": "pure-unit"},
                {"id": "ghost", "category": "pure-unit"}
            ]}"#,
        );
        let v = fx.run(&RegistryResolvable, GateKind::PostTestAuthoring);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].location, CheckRef::new("ghost", Category::PureUnit).to_string());
    }

    #[test]
    fn traceability_requires_ids_and_known_references() {
        let mut fx = Fixture::new();
        fx.write(REQUIREMENTS, "r.md", "The user logs in.");
        assert_eq!(fx.run(&RequirementTraceability, GateKind::PreGeneration).len(), 1);

        fx.write(REQUIREMENTS, "r.md", "REQ-001 The user logs in.");
        assert!(fx.run(&RequirementTraceability, GateKind::PreGeneration).is_empty());

        fx.write(
            CHECK_MANIFEST,
            "m.json",
            r#"{"checks": [
                {"id": "a", "category": "pure-unit", "requirement": "REQ-001"},
                {"id": "b", "category": "pure-unit", "requirement": "REQ-404"}
            ]}"#,
        );
        let v = fx.run(&RequirementTraceability, GateKind::PostTestAuthoring);
        assert_eq!(v.len(), 1);
        assert!(v[0].description.contains("REQ-404"));
    }

    #[test]
    fn scope_creep_warns_per_line() {
        let mut fx = Fixture::new();
        fx.write(
            REQUIREMENTS,
            "r.md",
            "REQ-001 login\nWhile we're at it, add SSO\nREQ-002 logout",
        );
        let v = fx.run(&ScopeCreep, GateKind::PreGeneration);
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].location, "requirements:2");
        assert!(!v[0].is_blocking());
    }

    #[test]
    fn rule_gate_applicability() {
        assert!(!ScopeCreep.applies_to(GateKind::PostImplementation));
        assert!(!ArtifactPresent.applies_to(GateKind::PostImplementation));
        assert!(RegistryResolvable.applies_to(GateKind::PostImplementation));
        assert_eq!(default_rules().len(), 7);
    }
}
