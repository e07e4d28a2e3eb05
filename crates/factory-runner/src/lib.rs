//! Check runner
//!
//! Executes a selection of registry checks and reports one structured
//! outcome per check:
//! - checks are partitioned by [`Category`](factory_registry::Category)
//! - categories that need a backing service wait for it (starting it if absent)
//! - each category runs through its own bounded worker pool, all categories
//!   concurrently
//!
//! # Example
//!
//! ```rust,ignore
//! use factory_runner::{resolve, CheckRunner, ProcessCheckRunner, RunnerConfig, Selector};
//!
//! # async fn example(registry: factory_registry::Registry) -> Result<(), factory_runner::RunnerError> {
//! let runner = ProcessCheckRunner::new(RunnerConfig::default(), ".");
//! let selection = resolve(&[Selector::Baseline], &registry)?;
//! let summary = runner.run(&selection).await?;
//! print!("{}", summary.render_human());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod outcome;
pub mod process;
pub mod runner;
pub mod selection;
pub mod service;

pub use config::{CategoryConfig, RunnerConfig, ServiceConfig, ID_PLACEHOLDER};
pub use error::RunnerError;
pub use outcome::{CheckOutcome, OutcomeStatus, RunReport, RunSummary};
pub use process::ProcessCheckRunner;
pub use runner::CheckRunner;
pub use selection::{partition, resolve, validate_selection, Selector};
pub use service::ServiceSupervisor;
