use async_trait::async_trait;
use ccpm_types::{CcpmError, RawPackagesIndex, RepositoryManifest, Result};
use std::path::Path;

use crate::{join_url, Driver};

/// Handles `http://` and `https://` repositories over [`reqwest`].
pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        tracing::debug!(url, "fetching json");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CcpmError::driver(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CcpmError::driver(format!(
                "request to {url} returned status {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CcpmError::driver(format!("failed to read body from {url}: {e}")))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| CcpmError::driver(format!("failed to parse json from {url}: {e}")))
    }
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for HttpDriver {
    fn can_handle(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn get_manifest(&self, repo_url: &str) -> Result<RepositoryManifest> {
        let url = join_url(repo_url, "manifest.json");
        self.get_json(&url).await
    }

    async fn get_packages_index(
        &self,
        repo_manifest: &RepositoryManifest,
    ) -> Result<RawPackagesIndex> {
        let url = join_url(&repo_manifest.url, "pool/index.json");
        self.get_json(&url).await
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

        tracing::debug!(url, "downloading package archive");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CcpmError::driver(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CcpmError::driver(format!(
                "request to {url} returned status {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CcpmError::driver(format!("failed to read body from {url}: {e}")))?;

        let dest_path = dest_dir.join(&file_name);
        fs_err::write(&dest_path, &bytes)?;
        Ok(())
    }
}
