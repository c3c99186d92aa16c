//! Background Download Manager: the central conductor of spec §4.11.
//! Submits each file of a repository to the Background Session Driver,
//! aggregates per-file driver callbacks into per-download progress, persists
//! that progress durably, extracts archives, finalizes completed downloads
//! through the File Layout, and notifies the host via the Notification Sink.
//!
//! Every active download owns a dedicated mailbox task (spec §5's actor
//! model): the dispatcher below is the only code that reads the driver's
//! single event stream, and it does nothing but route each event to the
//! mailbox for its `downloadId`. The mailbox task is the sole owner of that
//! download's mutable state, so no further locking is needed inside it.

use crate::archive;
use crate::config::NetworkConfig;
use crate::driver::{BackgroundSessionDriver, DriverEvent, SubmitTask, TaskDescription};
use crate::layout::FileLayout;
use crate::models::{
    Backend, BackgroundDownloadEvent, BackgroundDownloadHandle, BackgroundDownloadStatus, DownloadOptions,
    DownloadProgress, DownloadState, PersistedDownload, RepositoryId,
};
use crate::notifications::NotificationSink;
use crate::progress::ProgressAggregator;
use crate::resolver::FileListResolver;
use crate::state_store::StateStore;
use crate::{DownloadError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type MailboxMessage = (String, DriverEvent);

struct Mailbox {
    tx: mpsc::UnboundedSender<MailboxMessage>,
}

/// Central conductor: one instance per engine, shared by every background
/// download.
pub struct BackgroundDownloadManager {
    state_store: Arc<StateStore>,
    layout: Arc<FileLayout>,
    resolver: Arc<dyn FileListResolver>,
    driver: Arc<dyn BackgroundSessionDriver>,
    notifications: Arc<dyn NotificationSink>,
    mailboxes: Arc<Mutex<HashMap<Uuid, Mailbox>>>,
}

impl BackgroundDownloadManager {
    pub fn new(
        driver: Arc<dyn BackgroundSessionDriver>,
        driver_events: mpsc::UnboundedReceiver<(DriverEvent, TaskDescription)>,
        state_store: Arc<StateStore>,
        layout: Arc<FileLayout>,
        resolver: Arc<dyn FileListResolver>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        let mailboxes: Arc<Mutex<HashMap<Uuid, Mailbox>>> = Arc::new(Mutex::new(HashMap::new()));
        spawn_dispatcher(driver_events, mailboxes.clone());

        Self {
            state_store,
            layout,
            resolver,
            driver,
            notifications,
            mailboxes,
        }
    }

    /// Submit a new background download, returning a stream whose first
    /// event is the [`BackgroundDownloadHandle`] the caller uses for
    /// subsequent `status`/`cancel`/`pause`/`resume` calls (spec §4.11).
    pub async fn download(
        &self,
        repo_id: RepositoryId,
        backend: Backend,
        headers: Vec<(String, String)>,
        options: DownloadOptions,
    ) -> Result<mpsc::Receiver<BackgroundDownloadEvent>> {
        if self.layout.model_exists(&repo_id) {
            return Err(DownloadError::ModelAlreadyDownloaded(repo_id.to_string()));
        }

        let files = self.resolver.list_files(&repo_id, backend).await?;
        if files.is_empty() {
            return Err(DownloadError::NoFilesToDownload);
        }

        let id = Uuid::new_v4();
        let session_identifier = self.driver.session_identifier().to_string();
        let total_bytes: u64 = files.iter().filter_map(|f| f.size).sum();

        let persisted = PersistedDownload {
            id,
            repository_id: repo_id.clone(),
            backend,
            session_identifier,
            options: options.clone(),
            task_identifiers: HashMap::new(),
            download_date: chrono::Utc::now(),
            expected_files: files.iter().map(|f| f.relative_path.clone()).collect(),
            completed_files: Default::default(),
            file_downloads: files.clone(),
            total_bytes,
            bytes_downloaded: 0,
            state: DownloadState::Pending,
            error_text: None,
        };
        self.state_store.persist_download(&persisted).await?;

        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        self.mailboxes.lock().await.insert(id, Mailbox { tx: mailbox_tx });

        let (subscriber_tx, subscriber_rx) = mpsc::channel(64);

        let handle = BackgroundDownloadHandle {
            id,
            repository_id: repo_id.clone(),
            backend,
            session_identifier: persisted.session_identifier.clone(),
        };
        let _ = subscriber_tx.try_send(BackgroundDownloadEvent::Handle(handle));

        let staging = self.layout.temporary_directory(&repo_id);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| DownloadError::io_with_path(e, staging.clone()))?;

        spawn_mailbox_task(MailboxContext {
            id,
            repo_id,
            backend,
            staging,
            persisted,
            mailbox_rx,
            subscriber_tx,
            driver: self.driver.clone(),
            state_store: self.state_store.clone(),
            layout: self.layout.clone(),
            notifications: self.notifications.clone(),
            mailboxes: self.mailboxes.clone(),
            headers,
        });

        Ok(subscriber_rx)
    }

    pub async fn status(&self, id: Uuid) -> Option<BackgroundDownloadStatus> {
        let record = self.state_store.get_download(id).await?;
        Some(status_from_record(&record))
    }

    pub async fn list_active(&self) -> Vec<BackgroundDownloadStatus> {
        self.state_store
            .get_all_persisted_downloads()
            .await
            .into_iter()
            .filter(|d| !d.state.is_terminal())
            .map(|d| status_from_record(&d))
            .collect()
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let Some(record) = self.state_store.get_download(id).await else {
            return Err(DownloadError::Other(format!("unknown download {id}")));
        };
        for task_identifier in record.task_identifiers.values() {
            self.driver.cancel_task(*task_identifier).await;
        }
        self.state_store
            .update_download_progress(id, record.bytes_downloaded, None, Some(DownloadState::Cancelled))
            .await?;
        self.mailboxes.lock().await.remove(&id);
        Ok(())
    }

    pub async fn pause(&self, id: Uuid) -> Result<()> {
        let Some(record) = self.state_store.get_download(id).await else {
            return Err(DownloadError::Other(format!("unknown download {id}")));
        };
        for task_identifier in record.task_identifiers.values() {
            self.driver.pause_task(*task_identifier).await;
        }
        self.state_store
            .update_download_progress(id, record.bytes_downloaded, None, Some(DownloadState::Paused))
            .await
    }

    pub async fn resume(&self, id: Uuid) -> Result<()> {
        let Some(record) = self.state_store.get_download(id).await else {
            return Err(DownloadError::Other(format!("unknown download {id}")));
        };
        for task_identifier in record.task_identifiers.values() {
            self.driver.resume_task(*task_identifier).await;
        }
        self.state_store
            .update_download_progress(id, record.bytes_downloaded, None, Some(DownloadState::Downloading))
            .await
    }

    /// Resubmit every non-terminal persisted download on startup (spec
    /// §4.11: the manager must survive a process restart). Returns the
    /// number of downloads resubmitted.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.state_store.get_all_persisted_downloads().await;
        let mut restored = 0;

        for record in records.into_iter().filter(|d| !d.state.is_terminal()) {
            let id = record.id;
            let staging = self.layout.temporary_directory(&record.repository_id);
            tokio::fs::create_dir_all(&staging)
                .await
                .map_err(|e| DownloadError::io_with_path(e, staging.clone()))?;

            let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
            self.mailboxes.lock().await.insert(id, Mailbox { tx: mailbox_tx });
            let (subscriber_tx, subscriber_rx) = mpsc::channel(64);
            drop(subscriber_rx); // nobody is listening across a restart; state store remains the source of truth

            spawn_mailbox_task(MailboxContext {
                id,
                repo_id: record.repository_id.clone(),
                backend: record.backend,
                staging,
                persisted: record,
                mailbox_rx,
                subscriber_tx,
                driver: self.driver.clone(),
                state_store: self.state_store.clone(),
                layout: self.layout.clone(),
                notifications: self.notifications.clone(),
                mailboxes: self.mailboxes.clone(),
                headers: Vec::new(),
            });
            restored += 1;
        }

        debug!("restored {} background download(s)", restored);
        Ok(restored)
    }
}

fn status_from_record(record: &PersistedDownload) -> BackgroundDownloadStatus {
    BackgroundDownloadStatus {
        id: record.id,
        repository_id: record.repository_id.clone(),
        state: record.state,
        progress: DownloadProgress {
            bytes_downloaded: record.bytes_downloaded,
            total_bytes: record.total_bytes,
            files_completed: record.completed_files.len(),
            total_files: record.expected_files.len(),
            current_file_name: None,
        },
    }
}

fn spawn_dispatcher(
    mut driver_events: mpsc::UnboundedReceiver<(DriverEvent, TaskDescription)>,
    mailboxes: Arc<Mutex<HashMap<Uuid, Mailbox>>>,
) {
    tokio::spawn(async move {
        while let Some((event, description)) = driver_events.recv().await {
            let guard = mailboxes.lock().await;
            if let Some(mailbox) = guard.get(&description.download_id) {
                let _ = mailbox.tx.send((description.relative_path, event));
            }
        }
    });
}

struct MailboxContext {
    id: Uuid,
    repo_id: RepositoryId,
    backend: Backend,
    staging: std::path::PathBuf,
    persisted: PersistedDownload,
    mailbox_rx: mpsc::UnboundedReceiver<MailboxMessage>,
    subscriber_tx: mpsc::Sender<BackgroundDownloadEvent>,
    driver: Arc<dyn BackgroundSessionDriver>,
    state_store: Arc<StateStore>,
    layout: Arc<FileLayout>,
    notifications: Arc<dyn NotificationSink>,
    mailboxes: Arc<Mutex<HashMap<Uuid, Mailbox>>>,
    headers: Vec<(String, String)>,
}

fn spawn_mailbox_task(ctx: MailboxContext) {
    tokio::spawn(async move { run_mailbox(ctx).await });
}

async fn run_mailbox(ctx: MailboxContext) {
    let MailboxContext {
        id,
        repo_id,
        backend,
        staging,
        mut persisted,
        mut mailbox_rx,
        subscriber_tx,
        driver,
        state_store,
        layout,
        notifications,
        mailboxes,
        headers,
    } = ctx;

    let expected_sizes: HashMap<String, u64> = persisted
        .file_downloads
        .iter()
        .map(|f| (f.relative_path.clone(), f.size.unwrap_or(0)))
        .collect();
    let mut aggregator = ProgressAggregator::new(expected_sizes);
    for relative_path in &persisted.completed_files {
        if let Some(size) = persisted
            .file_downloads
            .iter()
            .find(|f| &f.relative_path == relative_path)
            .and_then(|f| f.size)
        {
            aggregator.record(relative_path, size, true);
        }
    }

    for file in &persisted.file_downloads {
        if persisted.completed_files.contains(&file.relative_path) {
            continue;
        }
        let dest = staging.join(&file.relative_path);
        let resume = tokio::fs::metadata(&dest).await.map(|m| m.len() > 0).unwrap_or(false);

        let submit_result = driver
            .submit(SubmitTask {
                url: file.url.clone(),
                headers: headers.clone(),
                local_staging_path: dest,
                expected_size: file.size,
                resume,
                description: TaskDescription {
                    download_id: id,
                    relative_path: file.relative_path.clone(),
                },
            })
            .await;

        match submit_result {
            Ok(task_identifier) => {
                persisted.task_identifiers.insert(file.relative_path.clone(), task_identifier);
                let _ = state_store
                    .update_download_task_identifier(id, &file.relative_path, task_identifier)
                    .await;
            }
            Err(e) => {
                error!("failed to submit task for {}: {}", file.relative_path, e);
                persisted.state = DownloadState::Failed;
                persisted.error_text = Some(e.to_string());
                let _ = state_store.persist_download(&persisted).await;
                notifications.download_failed(id, repo_id.as_str(), &e.to_string()).await;
                mailboxes.lock().await.remove(&id);
                return;
            }
        }
    }

    persisted.state = DownloadState::Downloading;
    if let Err(e) = state_store.persist_download(&persisted).await {
        warn!("failed to persist download {}: {}", id, e);
    }

    let mut last_persist = Instant::now();

    while let Some((relative_path, event)) = mailbox_rx.recv().await {
        match event {
            DriverEvent::Progress { bytes_received, .. } => {
                if let Some(progress) = aggregator.record(&relative_path, bytes_received, false) {
                    let _ = subscriber_tx.try_send(BackgroundDownloadEvent::Progress(progress));
                }
                if last_persist.elapsed() >= NetworkConfig::PROGRESS_PERSIST_INTERVAL {
                    persisted.bytes_downloaded = aggregator.force_emit().bytes_downloaded;
                    let _ = state_store
                        .update_download_progress(id, persisted.bytes_downloaded, None, None)
                        .await;
                    last_persist = Instant::now();
                }
            }
            DriverEvent::Completed { local_file, .. } => {
                if let Err(e) = finish_file(&local_file) {
                    fail_download(&mut persisted, &state_store, &notifications, &repo_id, id, &e).await;
                    mailboxes.lock().await.remove(&id);
                    return;
                }

                let expected_size = persisted
                    .file_downloads
                    .iter()
                    .find(|f| f.relative_path == relative_path)
                    .and_then(|f| f.size)
                    .unwrap_or(0);
                aggregator.record(&relative_path, expected_size, true);
                persisted.completed_files.insert(relative_path.clone());
                persisted.bytes_downloaded = aggregator.force_emit().bytes_downloaded;

                let _ = state_store
                    .update_download_progress(
                        id,
                        persisted.bytes_downloaded,
                        Some(persisted.completed_files.clone()),
                        None,
                    )
                    .await;

                if persisted.is_complete() {
                    let actual_size = dir_size(&staging);
                    match layout.finalize_download(&repo_id, repo_id.as_str(), backend, &staging, actual_size) {
                        Ok(info) => {
                            persisted.state = DownloadState::Completed;
                            let _ = state_store
                                .update_download_progress(id, actual_size, None, Some(DownloadState::Completed))
                                .await;
                            notifications.model_completed(&info.name, info.total_size).await;
                            let _ = subscriber_tx.try_send(BackgroundDownloadEvent::Completed(info));
                            info!("background download {} completed", id);
                        }
                        Err(e) => {
                            fail_download(&mut persisted, &state_store, &notifications, &repo_id, id, &e).await;
                        }
                    }
                    mailboxes.lock().await.remove(&id);
                    return;
                }
            }
            DriverEvent::Failed { error, .. } => {
                let err = DownloadError::DownloadFailed {
                    url: relative_path.clone(),
                    message: error,
                    status: None,
                };
                fail_download(&mut persisted, &state_store, &notifications, &repo_id, id, &err).await;
                mailboxes.lock().await.remove(&id);
                return;
            }
        }
    }
}

fn finish_file(local_file: &std::path::Path) -> Result<()> {
    if archive::is_zip(local_file) {
        let extract_to = local_file.with_extension("");
        archive::extract_zip(local_file, &extract_to)?;
        std::fs::remove_file(local_file).ok();
    }
    Ok(())
}

async fn fail_download(
    persisted: &mut PersistedDownload,
    state_store: &StateStore,
    notifications: &Arc<dyn NotificationSink>,
    repo_id: &RepositoryId,
    id: Uuid,
    error: &DownloadError,
) {
    persisted.state = DownloadState::Failed;
    persisted.error_text = Some(error.to_string());
    let _ = state_store
        .update_download_progress(id, persisted.bytes_downloaded, None, Some(DownloadState::Failed))
        .await;
    notifications.download_failed(id, repo_id.as_str(), &error.to_string()).await;
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
    use crate::driver::InProcessSessionDriver;
    use crate::fetcher::StreamingFetcher;
    use crate::models::RemoteFile;
    use crate::network::build_client;
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

    fn manager(tmp: &TempDir) -> (BackgroundDownloadManager, String) {
        let fetcher = Arc::new(StreamingFetcher::new(build_client().unwrap()));
        let (driver, rx) = InProcessSessionDriver::new("session-1", fetcher);
        let driver: Arc<dyn BackgroundSessionDriver> = Arc::new(driver);
        let layout = Arc::new(FileLayout::new(tmp.path().join("models"), tmp.path().join("temp")));
        let state_store = Arc::new(StateStore::new(tmp.path()));
        let resolver: Arc<dyn FileListResolver> = Arc::new(StaticFileListResolver::new(vec![]));
        let notifications: Arc<dyn NotificationSink> = Arc::new(LoggingNotificationSink);
        (
            BackgroundDownloadManager::new(driver, rx, state_store, layout, resolver, notifications),
            String::new(),
        )
    }

    #[tokio::test]
    async fn download_yields_handle_then_completed() {
        let body = b"gguf weights";
        let url = serve_once(body).await;
        let tmp = TempDir::new().unwrap();

        let fetcher = Arc::new(StreamingFetcher::new(build_client().unwrap()));
        let (driver, rx) = InProcessSessionDriver::new("session-1", fetcher);
        let driver: Arc<dyn BackgroundSessionDriver> = Arc::new(driver);
        let layout = Arc::new(FileLayout::new(tmp.path().join("models"), tmp.path().join("temp")));
        let state_store = Arc::new(StateStore::new(tmp.path()));
        let resolver: Arc<dyn FileListResolver> = Arc::new(StaticFileListResolver::new(vec![RemoteFile {
            url,
            relative_path: "model.gguf".to_string(),
            size: Some(body.len() as u64),
        }]));
        let notifications: Arc<dyn NotificationSink> = Arc::new(LoggingNotificationSink);
        let manager = BackgroundDownloadManager::new(driver, rx, state_store, layout.clone(), resolver, notifications);

        let repo = RepositoryId::parse("org/model").unwrap();
        let mut events = manager
            .download(repo.clone(), Backend::Gguf, vec![], DownloadOptions::default())
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, BackgroundDownloadEvent::Handle(_)));

        let mut completed = false;
        while let Some(event) = events.recv().await {
            if let BackgroundDownloadEvent::Completed(_) = event {
                completed = true;
                break;
            }
        }
        assert!(completed);
        assert!(layout.model_exists(&repo));
    }

    #[tokio::test]
    async fn rejects_when_already_downloaded() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(&tmp);
        let repo = RepositoryId::parse("org/model").unwrap();
        std::fs::create_dir_all(manager.layout.model_directory(&repo, Backend::Gguf)).unwrap();

        let result = manager.download(repo, Backend::Gguf, vec![], DownloadOptions::default()).await;
        assert!(matches!(result, Err(DownloadError::ModelAlreadyDownloaded(_))));
    }
}
