use std::path::PathBuf;

use ccpm_types::{glob_match, InstalledPackage, PackagesDatabase, Result};

use crate::events::EventSink;
use crate::store::JsonStore;

/// The installed-package database: §4.3's `packages-database.json`.
pub struct PackagesDatabaseStore {
    inner: JsonStore<PackagesDatabase>,
}

impl PackagesDatabaseStore {
    pub fn load(path: PathBuf, events: &dyn EventSink) -> Result<Self> {
        Ok(Self {
            inner: JsonStore::load(path, events)?,
        })
    }

    pub fn set(&mut self, db: PackagesDatabase) -> Result<()> {
        self.inner.set(db)
    }

    pub fn get(&self, name: &str) -> Option<InstalledPackage> {
        self.inner.get().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.get().contains_key(name)
    }

    /// Inserts or overwrites the record for `name` and persists the table.
    /// Used by the install and rollback-restore steps of the transaction
    /// engine.
    pub fn insert(&mut self, name: String, package: InstalledPackage) -> Result<()> {
        let mut table = self.inner.get();
        table.insert(name, package);
        self.inner.set(table)
    }

    /// Removes `name`, if present, and persists the table. Used by the
    /// uninstall step of the transaction engine.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let mut table = self.inner.get();
        table.remove(name);
        self.inner.set(table)
    }

    pub fn list(&self) -> PackagesDatabase {
        self.inner.get()
    }

    pub fn search(&self, pattern: &str) -> Vec<(String, InstalledPackage)> {
        self.inner
            .get()
            .into_iter()
            .filter(|(name, _)| glob_match(pattern, name))
            .collect()
    }
}
