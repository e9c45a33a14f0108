//! Patch registry
//!
//! Collects fragments from every contributing source for a single run and
//! hands them out in resolution order. The registry is built per run and
//! passed in explicitly; there is no process-wide instance.

use std::collections::{BTreeMap, BTreeSet};

use super::fragment::{FragmentId, PatchFragment};
use super::source::{PatchSource, SourceError};

/// Errors for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate fragment name '{name}' from source '{origin}'")]
    DuplicateName { origin: String, name: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// In-memory registry of patch fragments
#[derive(Debug, Default, Clone)]
pub struct PatchRegistry {
    fragments: BTreeMap<FragmentId, PatchFragment>,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one fragment.
    ///
    /// Fails if the same source already registered a fragment with this name.
    pub fn register(&mut self, fragment: PatchFragment) -> Result<(), RegistryError> {
        let id = fragment.id();
        if self.fragments.contains_key(&id) {
            return Err(RegistryError::DuplicateName {
                origin: id.source,
                name: id.name,
            });
        }
        self.fragments.insert(id, fragment);
        Ok(())
    }

    /// Register everything a source contributes, or nothing on any collision.
    ///
    /// Returns the number of fragments registered.
    pub fn register_source(&mut self, source: &dyn PatchSource) -> Result<usize, RegistryError> {
        let batch = source.fragments()?;

        let mut seen = BTreeSet::new();
        for fragment in &batch {
            let id = fragment.id();
            if self.fragments.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(RegistryError::DuplicateName {
                    origin: id.source,
                    name: id.name,
                });
            }
        }

        let count = batch.len();
        for fragment in batch {
            self.fragments.insert(fragment.id(), fragment);
        }
        Ok(count)
    }

    /// Remove every fragment from `source`. Idempotent; returns the count removed.
    pub fn unregister_source(&mut self, source: &str) -> usize {
        let before = self.fragments.len();
        self.fragments.retain(|id, _| id.source != source);
        before - self.fragments.len()
    }

    /// Fragments sorted by (priority ascending, source, name)
    pub fn list_fragments(&self) -> Vec<&PatchFragment> {
        let mut list: Vec<&PatchFragment> = self.fragments.values().collect();
        list.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        list
    }

    /// Distinct source names, sorted
    pub fn sources(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.fragments.keys().map(|id| id.source.as_str()).collect();
        names.into_iter().collect()
    }

    pub fn get(&self, id: &FragmentId) -> Option<&PatchFragment> {
        self.fragments.get(id)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
