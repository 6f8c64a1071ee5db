//! The transport capability abstraction described in §4.1: a [`Driver`]
//! fetches manifests, indices, and archives for one URL scheme. The engine
//! never speaks HTTP or the filesystem directly — it goes through whichever
//! driver's [`Driver::can_handle`] matches.

mod file;
mod http;
mod normalize;

pub use file::FileDriver;
pub use http::HttpDriver;
pub use normalize::normalize_repository_url;

use async_trait::async_trait;
use ccpm_types::{RawPackagesIndex, RepositoryManifest, Result};
use std::path::Path;

/// A capability to fetch manifests, indices, and package archives for one
/// URL scheme (`http(s)://`, `file://`, ...).
#[async_trait]
pub trait Driver: Send + Sync {
    /// Returns `true` if this driver handles `url`'s scheme.
    fn can_handle(&self, url: &str) -> bool;

    /// Fetches and parses `<repo_url>/manifest.json`.
    async fn get_manifest(&self, repo_url: &str) -> Result<RepositoryManifest>;

    /// Fetches and parses `<repo_manifest.url>/pool/index.json`.
    async fn get_packages_index(
        &self,
        repo_manifest: &RepositoryManifest,
    ) -> Result<RawPackagesIndex>;

    /// Fetches `<repo_manifest.url>/pool/<name>.<version>.ccp` into
    /// `dest_dir/<name>.<version>.ccp`.
    async fn download_package(
        &self,
        repo_manifest: &RepositoryManifest,
        name: &str,
        version: &str,
        dest_dir: &Path,
    ) -> Result<()>;
}

/// Strips a single trailing `/` from `url`, leaving the rest untouched.
/// §4.1: "URL normalisation strips a single trailing `/` before composing
/// the path suffix."
pub fn strip_trailing_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

/// Joins a normalised base URL with a path suffix (which must not itself
/// start with `/`).
pub fn join_url(base: &str, suffix: &str) -> String {
    format!("{}/{}", strip_trailing_slash(base), suffix)
}

/// Looks up the driver able to handle `url` among `drivers`, in order.
pub fn select_driver<'a>(drivers: &'a [Box<dyn Driver>], url: &str) -> Option<&'a dyn Driver> {
    drivers
        .iter()
        .map(AsRef::as_ref)
        .find(|driver| driver.can_handle(url))
}
