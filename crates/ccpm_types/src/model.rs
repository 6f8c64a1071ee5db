use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered source of packages, ranked against its peers by
/// [`Repository::priority`] — lower wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    pub priority: i64,
}

/// The `manifest.json` document served at a repository's root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryManifest {
    pub name: String,
    pub url: String,
    pub priority: i64,
}

/// The mapping of registered repositories, keyed by the UUID assigned on
/// [`crate::Repository`] registration.
pub type RepositoriesTable = BTreeMap<Uuid, Repository>;

/// The digest and dependency list recorded for one version of a package
/// inside a merged [`IndexEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVersion {
    pub digest: String,
    pub dependencies: Vec<String>,
}

/// The merged, per-package-name view produced by [`crate::PackagesIndex`]
/// reconciliation: one winning repository's metadata plus every version it
/// publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    pub latest_version: String,
    pub versions: BTreeMap<String, IndexVersion>,
    pub repository: Uuid,
    pub priority: i64,
}

impl IndexEntry {
    /// `true` iff `latest_version` is a key of `versions`, the invariant
    /// §3 requires of every entry.
    pub fn is_consistent(&self) -> bool {
        self.versions.contains_key(&self.latest_version)
    }
}

/// The merged package universe: package name → [`IndexEntry`].
pub type PackagesIndex = BTreeMap<String, IndexEntry>;

/// A raw, per-repository packages index as served at `pool/index.json`,
/// before it is merged with any other repository's index.
pub type RawPackagesIndex = BTreeMap<String, RawIndexEntry>;

/// One package's entry inside a single repository's `pool/index.json`,
/// prior to priority-based merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIndexEntry {
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    pub latest_version: String,
    pub versions: BTreeMap<String, IndexVersion>,
}

/// The record of one currently-installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub version: String,
    /// Absolute path → content digest, for every file this package owns.
    pub files: BTreeMap<PathBuf, String>,
    pub dependencies: Vec<String>,
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    /// `true` iff a user explicitly asked for this package by name.
    pub wanted: bool,
}

/// The installed-package database: package name → [`InstalledPackage`].
pub type PackagesDatabase = BTreeMap<String, InstalledPackage>;

/// One file entry inside a downloaded [`ArchiveManifest`], before it is
/// written to disk and its content discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFile {
    pub content: String,
    pub digest: String,
}

/// The manifest embedded inside a downloaded `.ccp` archive: a package's
/// description, license, authors, maintainers, dependencies and version,
/// plus the file contents themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub description: String,
    pub license: String,
    pub authors: Vec<String>,
    pub maintainers: Vec<String>,
    pub dependencies: Vec<String>,
    pub version: String,
    /// Relative path → file entry.
    pub files: BTreeMap<PathBuf, ArchiveFile>,
}
