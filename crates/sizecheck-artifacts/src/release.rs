use std::sync::Mutex;

use serde::Deserialize;

use crate::fetch::{ArtifactFetcher, FetchError};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseMetadata {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

/// Asset lookup over one release-metadata document.
///
/// The document is fetched on first use and kept for the lifetime of the
/// index; construct one per run and pass it by reference.
#[derive(Debug)]
pub struct ReleaseIndex {
    metadata_url: String,
    assets: Mutex<Option<Vec<ReleaseAsset>>>,
}

impl ReleaseIndex {
    pub fn new(metadata_url: impl Into<String>) -> Self {
        Self {
            metadata_url: metadata_url.into(),
            assets: Mutex::new(None),
        }
    }

    /// Index for a tagged release of `owner/repo` on GitHub.
    pub fn github(repo: &str, tag: &str) -> Self {
        Self::new(format!(
            "https://api.github.com/repos/{repo}/releases/tags/{tag}"
        ))
    }

    pub fn metadata_url(&self) -> &str {
        &self.metadata_url
    }

    pub fn assets(&self, fetcher: &ArtifactFetcher) -> Result<Vec<ReleaseAsset>, FetchError> {
        let mut guard = self.assets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(assets) = guard.as_ref() {
            return Ok(assets.clone());
        }
        let body = fetcher.http_get(&self.metadata_url, false)?;
        let doc: ReleaseMetadata =
            serde_json::from_slice(&body).map_err(|e| FetchError::Download {
                url: self.metadata_url.clone(),
                message: format!("parse release metadata: {e}"),
            })?;
        log::debug!(
            "release {} lists {} assets",
            self.metadata_url,
            doc.assets.len()
        );
        *guard = Some(doc.assets.clone());
        Ok(doc.assets)
    }

    /// Download URL of the asset called `name`, if the release has one.
    pub fn asset_url(
        &self,
        fetcher: &ArtifactFetcher,
        name: &str,
    ) -> Result<Option<String>, FetchError> {
        let url = self
            .assets(fetcher)?
            .into_iter()
            .find(|a| a.name == name)
            .map(|a| a.browser_download_url);
        if url.is_none() {
            log::warn!("asset {name} not found in {}", self.metadata_url);
        }
        Ok(url)
    }
}
