//! Factory Core - gated, resumable feature pipeline
//!
//! Sequences the phases that take a human spec to a verified
//! implementation:
//! - requirements are generated and checked against a green baseline
//! - a heuristic picks checks-first or implementation-first
//! - new checks are registered, gated, implemented against, and finally
//!   promoted into the baseline
//!
//! # Example
//!
//! ```rust,ignore
//! use factory_core::{FactoryConfig, Orchestrator, PipelineResult};
//!
//! # async fn example() -> Result<(), factory_core::FactoryError> {
//! let root = std::path::Path::new(".");
//! let orchestrator = Orchestrator::from_config(root, FactoryConfig::load(root)?);
//!
//! match orchestrator.run("specs/feature.md".as_ref()).await? {
//!     PipelineResult::Completed { promoted, .. } => println!("promoted {promoted} checks"),
//!     PipelineResult::Blocked { gate, .. } => print!("{}", gate.render_report()),
//!     PipelineResult::Cancelled { phase, .. } => println!("stopped before {phase}"),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod phase;
pub mod state;
pub mod strategy;

pub use cancel::CancelToken;
pub use config::{FactoryConfig, GenerationConfig, PathsConfig, StrategyConfig, CONFIG_FILE};
pub use error::{FactoryError, StateMachineError};
pub use generation::{
    generate_with_retry, CommandGenerator, ContentGenerator, Convergence, ConvergingGenerator,
    GenerationError, GenerationRequest, GenerationResponse,
};
pub use orchestrator::{Orchestrator, PhaseContext, PhaseReport, PipelineResult};
pub use phase::{allowed_transitions, validate_transition, Phase, Strategy};
pub use state::{digest, DecisionRecord, PipelineState, StateStore};
pub use strategy::{assess, StrategyAssessment};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a pipeline
    pub use crate::{
        CancelToken, ContentGenerator, FactoryConfig, FactoryError, Orchestrator, Phase,
        PipelineResult, Strategy,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
