//! File List Resolver: picks which concrete files to fetch for a
//! `(repositoryId, backend)` pair (spec §4.5).
//!
//! The resolver is deliberately a black box to the rest of the engine: the
//! Background Download Manager downloads exactly the list it returns, with
//! no separate "which file is canonical" logic elsewhere. Quantization
//! selection for GGUF repositories and any catalog lookups live behind this
//! trait, not in the download machinery.

use crate::models::{Backend, RemoteFile, RepositoryId};
use crate::{DownloadError, Result};
use async_trait::async_trait;
use serde::Deserialize;

/// Translates a repository + backend into the ordered list of files to
/// download. Implementations may hit a remote catalog; the core never
/// assumes anything about how the list was produced beyond its ordering.
#[async_trait]
pub trait FileListResolver: Send + Sync {
    async fn list_files(&self, repo_id: &RepositoryId, backend: Backend) -> Result<Vec<RemoteFile>>;
}

const HF_HUB_BASE: &str = "https://huggingface.co";

/// A [`FileListResolver`] backed by the HuggingFace Hub tree API.
///
/// Lists every file in a repository's `main` branch and maps each to its
/// `resolve/main` download URL. Quantization selection for GGUF backends is
/// left to the caller (the engine downloads exactly the list this resolver
/// returns); this resolver simply reports what exists. Shared by the
/// `modeldl-rpc` and `modeldl-ffi` crates so neither hosts its own copy of
/// the Hub wire format.
pub struct HfFileListResolver {
    client: reqwest::Client,
}

impl HfFileListResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct HfTreeEntry {
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<HfLfsInfo>,
}

#[derive(Debug, Deserialize)]
struct HfLfsInfo {
    size: u64,
}

#[async_trait]
impl FileListResolver for HfFileListResolver {
    async fn list_files(&self, repo_id: &RepositoryId, _backend: Backend) -> Result<Vec<RemoteFile>> {
        let url = format!("{}/api/models/{}/tree/main", HF_HUB_BASE, repo_id.as_str());
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Other(format!(
                "huggingface tree API returned {} for {}",
                response.status(),
                repo_id
            )));
        }

        let entries: Vec<HfTreeEntry> = response.json().await?;
        let files = entries
            .into_iter()
            .map(|entry| {
                let size = entry.lfs.map(|lfs| lfs.size).or(entry.size);
                RemoteFile {
                    url: format!("{}/{}/resolve/main/{}", HF_HUB_BASE, repo_id.as_str(), entry.path),
                    relative_path: entry.path,
                    size,
                }
            })
            .collect();

        Ok(files)
    }
}

/// A resolver that returns a caller-supplied, already-known file list.
/// Used when the caller has obtained the file list out of band (e.g. from a
/// prior catalog query) and wants the engine to download exactly those
/// files without consulting anything else.
pub struct StaticFileListResolver {
    files: Vec<RemoteFile>,
}

impl StaticFileListResolver {
    pub fn new(files: Vec<RemoteFile>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl FileListResolver for StaticFileListResolver {
    async fn list_files(&self, _repo_id: &RepositoryId, _backend: Backend) -> Result<Vec<RemoteFile>> {
        Ok(self.files.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_returns_configured_files() {
        let files = vec![RemoteFile {
            url: "https://example.com/model.safetensors".into(),
            relative_path: "model.safetensors".into(),
            size: Some(100),
        }];
        let resolver = StaticFileListResolver::new(files.clone());
        let repo = RepositoryId::parse("org/model").unwrap();

        let resolved = resolver.list_files(&repo, Backend::Mlx).await.unwrap();
        assert_eq!(resolved, files);
    }
}
