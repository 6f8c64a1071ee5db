use async_trait::async_trait;
use ccpm_types::{CcpmError, RawPackagesIndex, RepositoryManifest, Result};
use std::path::{Path, PathBuf};
use url::Url;

use crate::{join_url, Driver};

/// Handles `file://` repositories: a directory on the local filesystem laid
/// out exactly like an HTTP one (`manifest.json`, `pool/index.json`,
/// `pool/<name>.<version>.ccp`).
#[derive(Debug, Default)]
pub struct FileDriver;

impl FileDriver {
    pub fn new() -> Self {
        Self
    }

    fn resolve(url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)
            .map_err(|e| CcpmError::driver(format!("invalid file url {url}: {e}")))?;
        parsed
            .to_file_path()
            .map_err(|()| CcpmError::driver(format!("invalid file url {url}")))
    }

    fn read(path: &Path) -> Result<Vec<u8>> {
        if !path.exists() {
            return Err(CcpmError::driver(format!(
                "{} does not exist",
                path.display()
            )));
        }
        if path.is_dir() {
            return Err(CcpmError::driver(format!(
                "{} is a directory, expected a file",
                path.display()
            )));
        }
        Ok(fs_err::read(path)?)
    }
}

#[async_trait]
impl Driver for FileDriver {
    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("file://")
    }

    async fn get_manifest(&self, repo_url: &str) -> Result<RepositoryManifest> {
        let url = join_url(repo_url, "manifest.json");
        let path = Self::resolve(&url)?;
        let bytes = Self::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CcpmError::driver(format!("failed to parse {}: {e}", path.display())))
    }

    async fn get_packages_index(
        &self,
        repo_manifest: &RepositoryManifest,
    ) -> Result<RawPackagesIndex> {
        let url = join_url(&repo_manifest.url, "pool/index.json");
        let path = Self::resolve(&url)?;
        let bytes = Self::read(&path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CcpmError::driver(format!("failed to parse {}: {e}", path.display())))
    }

    async fn download_package(
        &self,
        repo_manifest: &RepositoryManifest,
        name: &str,
        version: &str,
        dest_dir: &Path,
    ) -> Result<()> {
        let file_name = format!("{name}.{version}.ccp");
        let url = join_url(&repo_manifest.url, &format!("pool/{file_name}"));
        let src_path = Self::resolve(&url)?;
        let bytes = Self::read(&src_path)?;
        fs_err::write(dest_dir.join(&file_name), bytes)?;
        Ok(())
    }
}
