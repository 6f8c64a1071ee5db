//! Data model, error taxonomy, and glob matching shared by every `ccpm`
//! crate.
//!
//! This crate does no I/O. It exists so that [`ccpm_driver`](../ccpm_driver)
//! and [`ccpm`](../ccpm) can agree on the shape of a repository manifest, a
//! merged package index entry, an installed package record, and the single
//! error type every fallible operation in the engine returns.

mod error;
mod glob;
mod model;
mod transaction;

pub use error::{CcpmError, ErrorKind, Result};
pub use glob::{glob_filter, glob_match};
pub use model::{
    ArchiveFile, ArchiveManifest, IndexEntry, IndexVersion, InstalledPackage, PackagesDatabase,
    PackagesIndex, RawIndexEntry, RawPackagesIndex, RepositoriesTable, Repository,
    RepositoryManifest,
};
pub use transaction::{
    InstallEntry, ProgressEntry, ProgressJournal, StepStatus, TransactionRecord,
    TransactionStatus, UninstallEntry,
};
