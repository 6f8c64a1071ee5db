use ccpm_types::{IndexEntry, InstalledPackage, Repository};

use crate::stores::{PackagesDatabaseStore, PackagesIndexStore, RepositoriesStore};

/// Pure read-only wrappers around the stores, per §4.8. Every method copies
/// out of the store before returning; nothing here can mutate engine state.
pub struct Query<'a> {
    pub repositories: &'a RepositoriesStore,
    pub index: &'a PackagesIndexStore,
    pub database: &'a PackagesDatabaseStore,
}

impl<'a> Query<'a> {
    pub fn new(
        repositories: &'a RepositoriesStore,
        index: &'a PackagesIndexStore,
        database: &'a PackagesDatabaseStore,
    ) -> Self {
        Self {
            repositories,
            index,
            database,
        }
    }

    pub fn list_repositories(&self) -> Vec<Repository> {
        self.repositories.list()
    }

    pub fn search_repositories(&self, pattern: &str) -> Vec<Repository> {
        self.repositories.search(pattern)
    }

    pub fn get_available_package(&self, name: &str) -> Option<IndexEntry> {
        self.index.get(name)
    }

    pub fn search_available_packages(&self, pattern: &str) -> Vec<(String, IndexEntry)> {
        self.index.search(pattern)
    }

    pub fn get_installed_package(&self, name: &str) -> Option<InstalledPackage> {
        self.database.get(name)
    }

    pub fn search_installed_packages(&self, pattern: &str) -> Vec<(String, InstalledPackage)> {
        self.database.search(pattern)
    }
}
