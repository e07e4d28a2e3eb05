//! Persisted registry store
//!
//! [`RegistryStore`] owns the location of the registry document and funnels
//! every mutation through read-modify-atomic-write. No other component writes
//! the document.

use crate::atomic::{json_bytes, write_atomic_with};
use crate::check::{Category, CheckId, CheckRef};
use crate::document::{Registry, RegistryFile, RegistrySet};
use crate::error::RegistryError;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Result of a promotion
#[derive(Debug, Clone)]
pub struct Promotion {
    /// References moved from new to baseline
    pub promoted: BTreeSet<CheckRef>,
    /// Document as persisted after promotion
    pub registry: Registry,
}

/// File-backed registry
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RegistryStore {
    /// Store backed by the document at `path`
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the document
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted registry
    ///
    /// A missing document is an empty registry.
    ///
    /// # Errors
    /// - `RegistryError::Corrupt` if the document cannot be parsed, overlaps
    ///   baseline and new, or lists an id under two categories
    /// - `RegistryError::Io` on read failure
    pub fn load(&self) -> Result<Registry, RegistryError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no registry document, starting empty");
                return Ok(Registry::empty());
            }
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };

        let file: RegistryFile =
            serde_json::from_str(&raw).map_err(|e| self.corrupt(e.to_string()))?;
        Registry::from_file(file).map_err(|reason| self.corrupt(reason))
    }

    /// Append ids to `new[category]`
    ///
    /// # Errors
    /// See [`add_new_batches`](Self::add_new_batches).
    pub fn add_new<I>(&self, category: Category, ids: I) -> Result<Registry, RegistryError>
    where
        I: IntoIterator<Item = CheckId>,
    {
        self.add_new_batches(std::iter::once((category, ids)))
    }

    /// Append several per-category batches in one write
    ///
    /// Either every batch is persisted or none is.
    ///
    /// # Errors
    /// - `RegistryError::DuplicateCheck` if an id is already in `baseline[category]`
    /// - `RegistryError::CategoryConflict` if an id is registered under another category
    /// - load and write errors
    ///
    /// The document is left unchanged on any error.
    pub fn add_new_batches<B, I>(&self, batches: B) -> Result<Registry, RegistryError>
    where
        B: IntoIterator<Item = (Category, I)>,
        I: IntoIterator<Item = CheckId>,
    {
        let _guard = self.write_lock.lock();
        let current = self.load()?;
        let next = current.with_new_batches(batches)?;
        self.write(&next)?;

        tracing::info!(
            added = next.len() - current.len(),
            new_total = next.query(RegistrySet::New, None).len(),
            "registered new checks"
        );
        Ok(next)
    }

    /// Move every new check into the baseline
    ///
    /// # Errors
    /// Load and write errors. The document is either fully pre- or fully
    /// post-promotion afterwards.
    pub fn promote_all(&self) -> Result<Promotion, RegistryError> {
        self.promote_with(|_| Ok(()))
    }

    /// Promotion with a hook run on the staged document before it replaces
    /// the persisted one
    pub(crate) fn promote_with<F>(&self, before_persist: F) -> Result<Promotion, RegistryError>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let _guard = self.write_lock.lock();
        let current = self.load()?;
        let promoted = current.query(RegistrySet::New, None);
        let next = current.promoted();
        self.write_with(&next, before_persist)?;

        tracing::info!(promoted = promoted.len(), "promoted new checks to baseline");
        Ok(Promotion {
            promoted,
            registry: next,
        })
    }

    /// Read-only query
    ///
    /// # Errors
    /// Load errors.
    pub fn query(
        &self,
        set: RegistrySet,
        category: Option<Category>,
    ) -> Result<BTreeSet<CheckRef>, RegistryError> {
        Ok(self.load()?.query(set, category))
    }

    fn write(&self, registry: &Registry) -> Result<(), RegistryError> {
        self.write_with(registry, |_| Ok(()))
    }

    fn write_with<F>(&self, registry: &Registry, before_persist: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        json_bytes(&registry.to_file())
            .and_then(|bytes| write_atomic_with(&self.path, &bytes, before_persist))
            .map_err(|e| RegistryError::io(&self.path, e))
    }

    fn corrupt(&self, reason: String) -> RegistryError {
        RegistryError::Corrupt {
            path: self.path.clone(),
            reason,
        }
    }
}
