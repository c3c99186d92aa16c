//! `ModelDownloadEngine`: the single entry point a host constructs once
//! (spec §6). Owns every subsystem and exposes the abstract operations of
//! spec §1 as concrete async methods.

use crate::archive;
use crate::config::PathsConfig;
use crate::coordinator::ForegroundCoordinator;
use crate::download_manager::BackgroundDownloadManager;
use crate::driver::{BackgroundSessionDriver, InProcessSessionDriver};
use crate::fetcher::StreamingFetcher;
use crate::layout::FileLayout;
use crate::models::{
    Backend, BackgroundDownloadEvent, BackgroundDownloadStatus, DownloadEvent, DownloadOptions, ModelInfo,
    RepositoryId, ValidationResult,
};
use crate::network::build_client;
use crate::notifications::{LoggingNotificationSink, NotificationSink};
use crate::resolver::FileListResolver;
use crate::state_store::StateStore;
use crate::task_manager::{CoordinatingTask, TaskManager};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Construction parameters for [`ModelDownloadEngine`]. `resolver` and
/// `notifications` are the two collaborator seams a host customizes; every
/// other subsystem is the engine's own concrete implementation.
pub struct EngineConfig {
    pub models_root: PathBuf,
    pub temp_root: PathBuf,
    pub state_dir: PathBuf,
    pub resolver: Arc<dyn FileListResolver>,
    pub notifications: Arc<dyn NotificationSink>,
}

impl EngineConfig {
    /// Convenience constructor rooted at a single data directory, using
    /// [`LoggingNotificationSink`] as the default notification sink.
    pub fn new(data_dir: impl AsRef<Path>, resolver: Arc<dyn FileListResolver>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            models_root: data_dir.join("models"),
            temp_root: data_dir.join("temp"),
            state_dir: data_dir.to_path_buf(),
            resolver,
            notifications: Arc::new(LoggingNotificationSink),
        }
    }
}

/// The headless download engine. Cheaply cloneable (all subsystems are
/// `Arc`-wrapped); clones share the same state.
#[derive(Clone)]
pub struct ModelDownloadEngine {
    layout: Arc<FileLayout>,
    fetcher: Arc<StreamingFetcher>,
    resolver: Arc<dyn FileListResolver>,
    task_manager: Arc<TaskManager>,
    background: Arc<BackgroundDownloadManager>,
}

impl ModelDownloadEngine {
    pub async fn new(config: EngineConfig) -> Result<Self> {
        let layout = Arc::new(FileLayout::new(config.models_root, config.temp_root));
        let fetcher = Arc::new(StreamingFetcher::new(build_client()?));
        let task_manager = Arc::new(TaskManager::new());
        let state_store = Arc::new(StateStore::new(&config.state_dir));

        let (driver, driver_events) = InProcessSessionDriver::new(Uuid::new_v4().to_string(), fetcher.clone());
        let driver: Arc<dyn BackgroundSessionDriver> = Arc::new(driver);

        let background = Arc::new(BackgroundDownloadManager::new(
            driver,
            driver_events,
            state_store,
            layout.clone(),
            config.resolver.clone(),
            config.notifications,
        ));
        background.restore().await?;

        Ok(Self {
            layout,
            fetcher,
            resolver: config.resolver,
            task_manager,
            background,
        })
    }

    /// Foreground download: streams [`DownloadEvent`]s until completion or
    /// failure (spec §1, §4.8). Fails immediately if a download for this
    /// repository is already running.
    pub async fn download_model(
        &self,
        repo_id: RepositoryId,
        backend: Backend,
        headers: Vec<(String, String)>,
        options: DownloadOptions,
    ) -> Result<mpsc::Receiver<Result<DownloadEvent>>> {
        if self.task_manager.is_downloading(&repo_id).await {
            return Err(crate::DownloadError::ModelAlreadyDownloaded(repo_id.to_string()));
        }

        let coordinator = Arc::new(ForegroundCoordinator::new(
            self.fetcher.clone(),
            self.layout.clone(),
            self.resolver.clone(),
        ));
        let (mut inner_rx, handle) = coordinator.start(repo_id.clone(), backend, headers, options);
        let handle = Arc::new(handle);

        // Tee the coordinator's internal event stream to the caller while
        // watching for it to close, so the task manager's bookkeeping is
        // cleared the moment the download reaches a terminal state without
        // requiring the caller to drive cleanup themselves.
        let (out_tx, out_rx) = mpsc::channel(32);
        let repo_for_cleanup = repo_id.clone();
        let task_manager = self.task_manager.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = inner_rx.recv().await {
                if out_tx.send(event).await.is_err() {
                    break;
                }
            }
            task_manager.remove(&repo_for_cleanup).await;
        });

        let cancel_handle = handle.clone();
        self.task_manager
            .store(repo_id, CoordinatingTask::new(move || cancel_handle.cancel(), forward))
            .await;

        Ok(out_rx)
    }

    pub async fn cancel_download(&self, repo_id: &RepositoryId) -> bool {
        self.task_manager.cancel(repo_id).await
    }

    pub async fn is_downloading(&self, repo_id: &RepositoryId) -> bool {
        self.task_manager.is_downloading(repo_id).await
    }

    /// Background download: returns a stream whose first event is the
    /// handle the caller will use to track this download (spec §4.11).
    pub async fn download_model_in_background(
        &self,
        repo_id: RepositoryId,
        backend: Backend,
        headers: Vec<(String, String)>,
        options: DownloadOptions,
    ) -> Result<mpsc::Receiver<BackgroundDownloadEvent>> {
        self.background.download(repo_id, backend, headers, options).await
    }

    pub async fn background_download_status(&self, id: Uuid) -> Option<BackgroundDownloadStatus> {
        self.background.status(id).await
    }

    pub async fn list_background_downloads(&self) -> Vec<BackgroundDownloadStatus> {
        self.background.list_active().await
    }

    pub async fn cancel_background_download(&self, id: Uuid) -> Result<()> {
        self.background.cancel(id).await
    }

    pub async fn pause_background_download(&self, id: Uuid) -> Result<()> {
        self.background.pause(id).await
    }

    pub async fn resume_background_download(&self, id: Uuid) -> Result<()> {
        self.background.resume(id).await
    }

    pub fn delete_model(&self, repo_id: &RepositoryId) -> Result<()> {
        self.layout.delete_model(repo_id)
    }

    pub fn list_downloaded_models(&self) -> Result<Vec<ModelInfo>> {
        self.layout.list_downloaded_models()
    }

    pub fn model_exists(&self, repo_id: &RepositoryId) -> bool {
        self.layout.model_exists(repo_id)
    }

    pub fn get_model_location(&self, repo_id: &RepositoryId) -> Option<PathBuf> {
        self.layout.get_model_location(repo_id)
    }

    pub fn get_model_files(&self, repo_id: &RepositoryId) -> Vec<PathBuf> {
        self.layout.get_model_files(repo_id)
    }

    pub fn get_model_size(&self, repo_id: &RepositoryId) -> Option<u64> {
        self.layout.get_model_size(repo_id)
    }

    pub fn available_disk_space(&self) -> Result<u64> {
        self.layout.available_disk_space()
    }

    pub fn has_enough_space(&self, required: u64) -> Result<bool> {
        self.layout.has_enough_space(required)
    }

    /// Removes orphaned staging directories older than the grace period
    /// that don't belong to a currently-active foreground or background
    /// download (spec §4.2).
    pub async fn cleanup_incomplete_downloads(&self) -> Result<usize> {
        let mut active: Vec<String> = self
            .task_manager
            .get_active_repository_ids()
            .await
            .into_iter()
            .map(|r| r.sanitized())
            .collect();
        active.extend(
            self.background
                .list_active()
                .await
                .into_iter()
                .map(|s| s.repository_id.sanitized()),
        );
        self.layout.cleanup_incomplete_downloads(&active)
    }

    /// Basic structural validation of a finalized model directory: confirms
    /// it exists and is non-empty. Warnings accumulate rather than fail
    /// outright, matching spec §1's distinction between a `Result` of hard
    /// preconditions and soft advisory checks.
    pub fn validate_model(&self, repo_id: &RepositoryId) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let Some(location) = self.layout.get_model_location(repo_id) else {
            result.warnings.push("model directory not found".to_string());
            return Ok(result);
        };

        let sidecar = location.join(PathsConfig::MODEL_INFO_FILENAME);
        if !sidecar.exists() {
            result.warnings.push("missing model_info.json sidecar".to_string());
        }

        let files = self.layout.get_model_files(repo_id);
        if files.is_empty() {
            result.warnings.push("model directory contains no files".to_string());
        }
        for file in &files {
            if archive::is_zip(file) {
                result
                    .warnings
                    .push(format!("unextracted archive left in place: {}", file.display()));
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteFile;
    use crate::notifications::LoggingNotificationSink;
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
    async fn end_to_end_foreground_download_then_list_and_delete() {
        let body = b"weights for an mlx model";
        let url = serve_once(body).await;
        let tmp = TempDir::new().unwrap();

        let resolver = Arc::new(StaticFileListResolver::new(vec![RemoteFile {
            url,
            relative_path: "weights.safetensors".to_string(),
            size: Some(body.len() as u64),
        }]));

        let engine = ModelDownloadEngine::new(EngineConfig::new(tmp.path(), resolver)).await.unwrap();
        let repo = RepositoryId::parse("mlx-community/demo-model").unwrap();

        let mut rx = engine
            .download_model(repo.clone(), Backend::Mlx, vec![], DownloadOptions::default())
            .await
            .unwrap();

        let mut completed = false;
        while let Some(event) = rx.recv().await {
            if let Ok(DownloadEvent::Completed(_)) = event {
                completed = true;
            }
        }
        assert!(completed);
        assert!(engine.model_exists(&repo));

        let models = engine.list_downloaded_models().unwrap();
        assert_eq!(models.len(), 1);

        engine.delete_model(&repo).unwrap();
        assert!(!engine.model_exists(&repo));
    }

    #[tokio::test]
    async fn validate_model_reports_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let resolver = Arc::new(StaticFileListResolver::new(vec![]));
        let engine = ModelDownloadEngine::new(EngineConfig::new(tmp.path(), resolver)).await.unwrap();

        let repo = RepositoryId::parse("org/missing").unwrap();
        let result = engine.validate_model(&repo).unwrap();
        assert!(!result.warnings.is_empty());
    }
}
