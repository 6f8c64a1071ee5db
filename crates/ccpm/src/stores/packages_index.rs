use std::path::PathBuf;

use ccpm_types::{glob_match, IndexEntry, PackagesIndex, Result};

use crate::events::EventSink;
use crate::store::JsonStore;

/// The merged package index: §4.3's `packages-index.json`. Whole-table
/// `set` only — an [`IndexEntry`] is a pure function of the live
/// repositories, so it is always replaced wholesale by a refresh.
pub struct PackagesIndexStore {
    inner: JsonStore<PackagesIndex>,
}

impl PackagesIndexStore {
    pub fn load(path: PathBuf, events: &dyn EventSink) -> Result<Self> {
        Ok(Self {
            inner: JsonStore::load(path, events)?,
        })
    }

    pub fn set(&mut self, index: PackagesIndex) -> Result<()> {
        self.inner.set(index)
    }

    pub fn get(&self, name: &str) -> Option<IndexEntry> {
        self.inner.get().get(name).cloned()
    }

    pub fn list(&self) -> PackagesIndex {
        self.inner.get()
    }

    pub fn search(&self, pattern: &str) -> Vec<(String, IndexEntry)> {
        self.inner
            .get()
            .into_iter()
            .filter(|(name, _)| glob_match(pattern, name))
            .collect()
    }
}
