//! Quality gates
//!
//! A gate judges the artifacts of a phase in two steps:
//! - **static** rules read artifacts and the registry
//! - **dynamic** checks execute registry checks through a
//!   [`CheckRunner`](factory_runner::CheckRunner)
//!
//! Blocking static findings short-circuit the dynamic step.
//!
//! # Example
//!
//! ```rust,ignore
//! use factory_gate::{ArtifactSet, GateEvaluator, GateKind, REQUIREMENTS};
//!
//! # async fn example(runner: std::sync::Arc<dyn factory_runner::CheckRunner>,
//! #                  registry: factory_registry::Registry) -> Result<(), factory_gate::GateError> {
//! let gate = GateEvaluator::new(runner, ".");
//! let artifacts = ArtifactSet::new().with(REQUIREMENTS, ".factory/artifacts/requirements.md");
//! let result = gate.evaluate(GateKind::PreGeneration, &artifacts, &registry).await?;
//! print!("{}", result.render_report());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod artifacts;
pub mod error;
pub mod evaluator;
pub mod manifest;
pub mod requirements;
pub mod result;
pub mod rules;
pub mod violation;

pub use artifacts::{ArtifactSet, CHECK_MANIFEST, IMPLEMENTATION, REQUIREMENTS, SPEC};
pub use error::GateError;
pub use evaluator::GateEvaluator;
pub use manifest::{CheckManifest, ManifestEntry};
pub use requirements::requirement_ids;
pub use result::{GateKind, GateOutcome, GateResult};
pub use rules::{default_rules, RuleContext, StaticRule};
pub use violation::{Severity, Violation};
