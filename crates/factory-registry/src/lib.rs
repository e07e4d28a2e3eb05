//! Check registry
//!
//! Persisted record of two disjoint sets of check identifiers:
//! - **baseline**: promoted, known-good checks that must always pass
//! - **new**: checks added during the current cycle, expected to fail until
//!   the implementation lands
//!
//! New checks move to the baseline only through [`RegistryStore::promote_all`],
//! which rewrites the whole document atomically.
//!
//! # Example
//!
//! ```rust,ignore
//! use factory_registry::{Category, CheckId, RegistrySet, RegistryStore};
//!
//! let store = RegistryStore::new(".factory/test-registry.json");
//! store.add_new(Category::ServiceIntegration, [CheckId::new("X")])?;
//! store.promote_all()?;
//! assert_eq!(store.query(RegistrySet::Baseline, None)?.len(), 1);
//! ```

#![warn(unreachable_pub)]

pub mod atomic;
pub mod check;
pub mod document;
pub mod error;
pub mod store;

pub use atomic::{write_atomic, write_json_atomic};
pub use check::{Category, CheckId, CheckRef, UnknownCategory};
pub use document::{Registry, RegistrySet};
pub use error::RegistryError;
pub use store::{Promotion, RegistryStore};
