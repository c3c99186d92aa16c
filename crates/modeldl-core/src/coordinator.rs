//! Foreground Coordinator: drives one repository through the state machine
//! of spec §4.8 by composing the Streaming Fetcher, File List Resolver, and
//! File Layout. Used directly by `downloadModel` and internally by the
//! Background Download Manager for each active download's file transfers.

use crate::archive;
use crate::cancel::CancellationToken;
use crate::fetcher::StreamingFetcher;
use crate::layout::FileLayout;
use crate::models::{Backend, DownloadEvent, DownloadOptions, ModelInfo, RepositoryId};
use crate::progress::ProgressAggregator;
use crate::resolver::FileListResolver;
use crate::{DownloadError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Cooperative controls for a coordinator run in progress, returned
/// alongside the event receiver from [`ForegroundCoordinator::start`].
pub struct ForegroundHandle {
    cancel_token: CancellationToken,
    fetcher: Arc<StreamingFetcher>,
    urls: Arc<std::sync::Mutex<Vec<String>>>,
    staging: std::path::PathBuf,
}

impl ForegroundHandle {
    pub fn pause(&self) {
        for url in self.urls.lock().unwrap().iter() {
            self.fetcher.pause(url);
        }
    }

    pub fn resume(&self) {
        for url in self.urls.lock().unwrap().iter() {
            self.fetcher.resume(url);
        }
    }

    /// Cancels fetcher tasks and removes the staging directory (spec §4.8).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
        for url in self.urls.lock().unwrap().iter() {
            self.fetcher.cancel(url);
        }
        std::fs::remove_dir_all(&self.staging).ok();
    }
}

/// Orchestrates one repository's download: resolve file list, stage
/// transfers under bounded concurrency, extract archives, and atomically
/// promote the result (spec §4.8).
pub struct ForegroundCoordinator {
    fetcher: Arc<StreamingFetcher>,
    layout: Arc<FileLayout>,
    resolver: Arc<dyn FileListResolver>,
}

impl ForegroundCoordinator {
    pub fn new(
        fetcher: Arc<StreamingFetcher>,
        layout: Arc<FileLayout>,
        resolver: Arc<dyn FileListResolver>,
    ) -> Self {
        Self {
            fetcher,
            layout,
            resolver,
        }
    }

    /// Start a download, returning a stream of [`DownloadEvent`]s and a
    /// handle for pause/resume/cancel. Fails fast with
    /// [`DownloadError::ModelAlreadyDownloaded`] if the model already exists
    /// (spec §4.8: starting is not idempotent over an existing model).
    pub fn start(
        self: Arc<Self>,
        repo_id: RepositoryId,
        backend: Backend,
        headers: Vec<(String, String)>,
        options: DownloadOptions,
    ) -> (mpsc::Receiver<Result<DownloadEvent>>, ForegroundHandle) {
        let (tx, rx) = mpsc::channel(32);
        let cancel_token = CancellationToken::new();
        let urls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let staging = self.layout.temporary_directory(&repo_id);

        let handle = ForegroundHandle {
            cancel_token: cancel_token.clone(),
            fetcher: self.fetcher.clone(),
            urls: urls.clone(),
            staging: staging.clone(),
        };

        tokio::spawn(async move {
            let result = self
                .run(&repo_id, backend, &headers, &options, &cancel_token, &urls, &staging, &tx)
                .await;
            if let Err(e) = result {
                if !cancel_token.is_cancelled() {
                    tokio::fs::remove_dir_all(&staging).await.ok();
                }
                let _ = tx.send(Err(e)).await;
            }
        });

        (rx, handle)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        repo_id: &RepositoryId,
        backend: Backend,
        headers: &[(String, String)],
        options: &DownloadOptions,
        cancel_token: &CancellationToken,
        urls: &Arc<std::sync::Mutex<Vec<String>>>,
        staging: &std::path::Path,
        tx: &mpsc::Sender<Result<DownloadEvent>>,
    ) -> Result<()> {
        if self.layout.model_exists(repo_id) {
            return Err(DownloadError::ModelAlreadyDownloaded(repo_id.to_string()));
        }

        let files = self.resolver.list_files(repo_id, backend).await?;
        if files.is_empty() {
            return Err(DownloadError::NoFilesToDownload);
        }

        let total_bytes: u64 = files.iter().filter_map(|f| f.size).sum();
        if total_bytes > 0 {
            let available = self.layout.available_disk_space()?;
            if available < total_bytes {
                return Err(DownloadError::DiskFull {
                    needed: total_bytes,
                    available,
                });
            }
        }

        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| DownloadError::io_with_path(e, staging.to_path_buf()))?;

        {
            let mut guard = urls.lock().unwrap();
            for file in &files {
                guard.push(file.url.clone());
            }
        }

        let expected_sizes: HashMap<String, u64> = files
            .iter()
            .map(|f| (f.relative_path.clone(), f.size.unwrap_or(0)))
            .collect();
        let aggregator = Arc::new(std::sync::Mutex::new(ProgressAggregator::new(expected_sizes)));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(options.file_concurrency()));

        let mut join_set = tokio::task::JoinSet::new();
        for file in files.iter().cloned() {
            cancel_token.check()?;
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let fetcher = self.fetcher.clone();
            let dest = staging.join(&file.relative_path);
            let headers = headers.to_vec();
            let aggregator = aggregator.clone();
            let tx = tx.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let rel_path = file.relative_path.clone();
                let aggregator_for_progress = aggregator.clone();
                let progress = move |fraction: f64| {
                    let bytes = file.size.map(|s| (s as f64 * fraction) as u64).unwrap_or(0);
                    let flushed = fraction >= 1.0;
                    let mut agg = aggregator_for_progress.lock().unwrap();
                    if let Some(progress) = agg.record(&rel_path, bytes, flushed) {
                        let _ = tx.try_send(Ok(DownloadEvent::Progress(progress)));
                    }
                };

                let result = fetcher.download(&file.url, &dest, &headers, progress, file.size).await;
                result.map(|path| (file.relative_path.clone(), path))
            });
        }

        while let Some(outcome) = join_set.join_next().await {
            let result = outcome.map_err(|e| DownloadError::Other(e.to_string()))?;
            let (relative_path, path) = result?;

            if archive::is_zip(&path) {
                let extract_to = path.with_extension("");
                match archive::extract_zip(&path, &extract_to) {
                    Ok(_) => {
                        std::fs::remove_file(&path).ok();
                    }
                    Err(e) => {
                        warn!("archive extraction failed for {}: {}", relative_path, e);
                        return Err(e);
                    }
                }
            }
        }

        {
            let mut agg = aggregator.lock().unwrap();
            let _ = tx.try_send(Ok(DownloadEvent::Progress(agg.force_emit())));
        }

        let actual_size = dir_size(staging);
        let info = self
            .layout
            .finalize_download(repo_id, repo_id.as_str(), backend, staging, actual_size)?;

        debug!("finalized download for {}", repo_id);
        tx.send(Ok(DownloadEvent::Completed(info))).await.ok();
        Ok(())
    }
}

fn dir_size(path: &std::path::Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteFile;
    use crate::network::build_client;
    use crate::resolver::StaticFileListResolver;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            socket.read(&mut buf).await.ok();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/file.bin", addr)
    }

    #[tokio::test]
    async fn downloads_single_file_and_emits_completed() {
        let body = b"model weights";
        let url = serve_once(body).await;

        let tmp = TempDir::new().unwrap();
        let layout = Arc::new(FileLayout::new(tmp.path().join("models"), tmp.path().join("temp")));
        let fetcher = Arc::new(StreamingFetcher::new(build_client().unwrap()));
        let resolver = Arc::new(StaticFileListResolver::new(vec![RemoteFile {
            url,
            relative_path: "model.bin".to_string(),
            size: Some(body.len() as u64),
        }]));

        let coordinator = Arc::new(ForegroundCoordinator::new(fetcher, layout.clone(), resolver));
        let repo = RepositoryId::parse("org/model").unwrap();
        let (mut rx, _handle) = coordinator.start(repo.clone(), Backend::Gguf, vec![], DownloadOptions::default());

        let mut completed = false;
        while let Some(event) = rx.recv().await {
            if let Ok(DownloadEvent::Completed(_)) = event {
                completed = true;
                break;
            }
        }
        assert!(completed);
        assert!(layout.model_exists(&repo));
    }

    #[tokio::test]
    async fn rejects_when_model_already_exists() {
        let tmp = TempDir::new().unwrap();
        let layout = Arc::new(FileLayout::new(tmp.path().join("models"), tmp.path().join("temp")));
        let repo = RepositoryId::parse("org/model").unwrap();
        std::fs::create_dir_all(layout.model_directory(&repo, Backend::Gguf)).unwrap();

        let fetcher = Arc::new(StreamingFetcher::new(build_client().unwrap()));
        let resolver = Arc::new(StaticFileListResolver::new(vec![]));
        let coordinator = Arc::new(ForegroundCoordinator::new(fetcher, layout, resolver));

        let (mut rx, _handle) = coordinator.start(repo, Backend::Gguf, vec![], DownloadOptions::default());
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(DownloadError::ModelAlreadyDownloaded(_))));
    }

    #[tokio::test]
    async fn rejects_empty_file_list() {
        let tmp = TempDir::new().unwrap();
        let layout = Arc::new(FileLayout::new(tmp.path().join("models"), tmp.path().join("temp")));
        let fetcher = Arc::new(StreamingFetcher::new(build_client().unwrap()));
        let resolver = Arc::new(StaticFileListResolver::new(vec![]));
        let coordinator = Arc::new(ForegroundCoordinator::new(fetcher, layout, resolver));

        let repo = RepositoryId::parse("org/model").unwrap();
        let (mut rx, _handle) = coordinator.start(repo, Backend::Gguf, vec![], DownloadOptions::default());
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Err(DownloadError::NoFilesToDownload)));
    }
}
