use std::path::PathBuf;

use ccpm_types::{glob_match, CcpmError, RepositoriesTable, Repository, Result};
use uuid::Uuid;

use crate::events::EventSink;
use crate::store::JsonStore;

/// The repository table: §4.3's `repositories-index.json`.
pub struct RepositoriesStore {
    inner: JsonStore<RepositoriesTable>,
}

impl RepositoriesStore {
    pub fn load(path: PathBuf, events: &dyn EventSink) -> Result<Self> {
        Ok(Self {
            inner: JsonStore::load(path, events)?,
        })
    }

    pub fn get(&self, id: &Uuid) -> Option<Repository> {
        self.inner.get().get(id).cloned()
    }

    /// Registers `repository`, rejecting a duplicate `url` per §3's
    /// invariant. Returns the freshly assigned UUID.
    pub fn add(&mut self, repository: Repository) -> Result<Uuid> {
        let mut table = self.inner.get();
        if table.values().any(|r| r.url == repository.url) {
            return Err(CcpmError::invalid_input(format!(
                "a repository with url {} is already registered",
                repository.url
            )));
        }
        let id = Uuid::new_v4();
        table.insert(id, repository);
        self.inner.set(table)?;
        Ok(id)
    }

    /// Overwrites the record for `id` in place (used by refresh when a
    /// repository's name/url/priority migrated).
    pub fn update(&mut self, id: Uuid, repository: Repository) -> Result<()> {
        let mut table = self.inner.get();
        table.insert(id, repository);
        self.inner.set(table)
    }

    pub fn remove(&mut self, id: &Uuid) -> Result<()> {
        let mut table = self.inner.get();
        table.remove(id);
        self.inner.set(table)
    }

    pub fn list(&self) -> Vec<Repository> {
        self.inner.get().into_values().collect()
    }

    pub fn list_with_ids(&self) -> Vec<(Uuid, Repository)> {
        self.inner.get().into_iter().collect()
    }

    pub fn search(&self, pattern: &str) -> Vec<Repository> {
        self.inner
            .get()
            .into_values()
            .filter(|r| glob_match(pattern, &r.name))
            .collect()
    }
}
