//! UniFFI-exported surface over [`modeldl_core::ModelDownloadEngine`].
//!
//! All types exposed across the FFI boundary are defined here rather than
//! re-exported from `modeldl-core` directly — `RepositoryId`, `Uuid`,
//! `PathBuf` and `HashMap` either aren't UniFFI-safe or would leak an
//! internal representation across the boundary. Every `Ffi*` type below has
//! an explicit conversion to or from its `modeldl-core` counterpart instead.

use modeldl_core::network::build_client;
use modeldl_core::resolver::HfFileListResolver;
use modeldl_core::{
    Backend, DownloadError, DownloadEvent, DownloadOptions, DownloadState, DownloadStatus, EngineConfig,
    ModelDownloadEngine, ModelInfo, Priority, RepositoryId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// =============================================================================
// FfiError
// =============================================================================

/// FFI-friendly mirror of [`DownloadError`] (spec §7's error kinds).
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("invalid repository identifier: {0}")]
    InvalidRepositoryIdentifier(String),

    #[error("model already downloaded: {0}")]
    ModelAlreadyDownloaded(String),

    #[error("no files to download")]
    NoFilesToDownload,

    #[error("download failed for {url}: {message}")]
    DownloadFailed {
        url: String,
        message: String,
        status: Option<u16>,
    },

    #[error("cancelled")]
    Cancellation,

    #[error("archive is not a valid zip: {path}")]
    ArchiveInvalid { path: String },

    #[error("extraction failed for {path}: {message}")]
    ExtractionFailed { path: String, message: String },

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    DiskFull { needed: u64, available: u64 },

    #[error("filesystem error: {message}")]
    FilesystemError { message: String },

    #[error("state store corrupted: {0}")]
    StateCorrupted(String),

    #[error("network error: {message}")]
    Network { message: String },

    #[error("{0}")]
    Other(String),
}

impl From<DownloadError> for FfiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::InvalidRepositoryIdentifier(s) => FfiError::InvalidRepositoryIdentifier(s),
            DownloadError::ModelAlreadyDownloaded(s) => FfiError::ModelAlreadyDownloaded(s),
            DownloadError::NoFilesToDownload => FfiError::NoFilesToDownload,
            DownloadError::DownloadFailed { url, message, status } => {
                FfiError::DownloadFailed { url, message, status }
            }
            DownloadError::Cancellation => FfiError::Cancellation,
            DownloadError::ArchiveInvalid(path) => FfiError::ArchiveInvalid {
                path: path.display().to_string(),
            },
            DownloadError::ExtractionFailed { path, message } => FfiError::ExtractionFailed {
                path: path.display().to_string(),
                message,
            },
            DownloadError::DiskFull { needed, available } => FfiError::DiskFull { needed, available },
            DownloadError::FilesystemError { message, path } => FfiError::FilesystemError {
                message: match path {
                    Some(p) => format!("{}: {}", p.display(), message),
                    None => message,
                },
            },
            DownloadError::StateCorrupted(s) => FfiError::StateCorrupted(s),
            DownloadError::Other(s) => FfiError::Other(s),
            DownloadError::Network(e) => FfiError::Network { message: e.to_string() },
            DownloadError::Io(e) => FfiError::FilesystemError { message: e.to_string() },
            DownloadError::Json(e) => FfiError::Other(format!("json error: {e}")),
        }
    }
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

fn parse_repo_id(raw: &str) -> FfiResult<RepositoryId> {
    RepositoryId::parse(raw).map_err(FfiError::from)
}

fn parse_download_id(raw: &str) -> FfiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| FfiError::Other(format!("invalid download id: {e}")))
}

// UniFFI scaffolding - this generates the FFI glue code
uniffi::setup_scaffolding!();

/// Get the version of this crate's FFI bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// =============================================================================
// FFI Wrapper Types
// =============================================================================

/// Runtime flavor the model is prepared for (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiBackend {
    Mlx,
    Gguf,
    Coreml,
    Remote,
}

impl From<FfiBackend> for Backend {
    fn from(b: FfiBackend) -> Self {
        match b {
            FfiBackend::Mlx => Backend::Mlx,
            FfiBackend::Gguf => Backend::Gguf,
            FfiBackend::Coreml => Backend::Coreml,
            FfiBackend::Remote => Backend::Remote,
        }
    }
}

impl From<Backend> for FfiBackend {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Mlx => FfiBackend::Mlx,
            Backend::Gguf => FfiBackend::Gguf,
            Backend::Coreml => FfiBackend::Coreml,
            Backend::Remote => FfiBackend::Remote,
        }
    }
}

/// Scheduling priority hint passed through to the background driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiPriority {
    Low,
    Normal,
    High,
}

impl From<FfiPriority> for Priority {
    fn from(p: FfiPriority) -> Self {
        match p {
            FfiPriority::Low => Priority::Low,
            FfiPriority::Normal => Priority::Normal,
            FfiPriority::High => Priority::High,
        }
    }
}

/// A single HTTP header to attach to every file request of a download.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHeader {
    pub name: String,
    pub value: String,
}

/// FFI-safe mirror of [`DownloadOptions`] (spec §3).
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDownloadOptions {
    pub enable_cellular: bool,
    pub notification_title: Option<String>,
    pub priority: FfiPriority,
    pub is_discretionary: bool,
}

impl From<FfiDownloadOptions> for DownloadOptions {
    fn from(o: FfiDownloadOptions) -> Self {
        Self {
            enable_cellular: o.enable_cellular,
            notification_title: o.notification_title,
            priority: o.priority.into(),
            is_discretionary: o.is_discretionary,
        }
    }
}

impl Default for FfiDownloadOptions {
    fn default() -> Self {
        let defaults = DownloadOptions::default();
        Self {
            enable_cellular: defaults.enable_cellular,
            notification_title: defaults.notification_title,
            priority: FfiPriority::Normal,
            is_discretionary: defaults.is_discretionary,
        }
    }
}

/// FFI-safe mirror of [`modeldl_core::DownloadProgress`]; `usize` fields
/// widen to `u64`, which isn't a lossy conversion on any platform this
/// engine targets but does cross the FFI boundary cleanly.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub files_completed: u64,
    pub total_files: u64,
    pub current_file_name: Option<String>,
}

impl From<modeldl_core::DownloadProgress> for FfiDownloadProgress {
    fn from(p: modeldl_core::DownloadProgress) -> Self {
        Self {
            bytes_downloaded: p.bytes_downloaded,
            total_bytes: p.total_bytes,
            files_completed: p.files_completed as u64,
            total_files: p.total_files as u64,
            current_file_name: p.current_file_name,
        }
    }
}

/// A single `metadata` entry of a [`FfiModelInfo`]; used instead of
/// `HashMap<String, String>`, which can't cross the FFI boundary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMetadataEntry {
    pub key: String,
    pub value: String,
}

/// FFI-safe mirror of [`ModelInfo`] (spec §3).
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiModelInfo {
    pub id: String,
    pub name: String,
    pub backend: FfiBackend,
    pub location: String,
    pub total_size: u64,
    pub download_date: String,
    pub metadata: Vec<FfiMetadataEntry>,
}

impl From<ModelInfo> for FfiModelInfo {
    fn from(info: ModelInfo) -> Self {
        Self {
            id: info.id.to_string(),
            name: info.name,
            backend: info.backend.into(),
            location: info.location.display().to_string(),
            total_size: info.total_size,
            download_date: info.download_date.to_rfc3339(),
            metadata: info
                .metadata
                .into_iter()
                .map(|(key, value)| FfiMetadataEntry { key, value })
                .collect(),
        }
    }
}

/// Phase of a foreground (`download_model`) transfer (spec §3:
/// `DownloadStatus`), flattened into a single record since UniFFI enum
/// variants with payloads would otherwise force every caller to match on
/// and unwrap phase-specific fields that are absent for most phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiForegroundPhase {
    NotStarted,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiForegroundStatus {
    pub phase: FfiForegroundPhase,
    pub fraction_completed: f64,
    pub error_text: Option<String>,
}

impl FfiForegroundStatus {
    fn not_started() -> Self {
        Self {
            phase: FfiForegroundPhase::NotStarted,
            fraction_completed: 0.0,
            error_text: None,
        }
    }
}

impl From<DownloadStatus> for FfiForegroundStatus {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::NotStarted => Self::not_started(),
            DownloadStatus::Downloading { progress } => Self {
                phase: FfiForegroundPhase::Downloading,
                fraction_completed: progress,
                error_text: None,
            },
            DownloadStatus::Paused { progress } => Self {
                phase: FfiForegroundPhase::Paused,
                fraction_completed: progress,
                error_text: None,
            },
            DownloadStatus::Completed => Self {
                phase: FfiForegroundPhase::Completed,
                fraction_completed: 1.0,
                error_text: None,
            },
            DownloadStatus::Failed { error_text } => Self {
                phase: FfiForegroundPhase::Failed,
                fraction_completed: 0.0,
                error_text: Some(error_text),
            },
            DownloadStatus::Cancelled => Self {
                phase: FfiForegroundPhase::Cancelled,
                fraction_completed: 0.0,
                error_text: None,
            },
        }
    }
}

/// State of a [`modeldl_core::PersistedDownload`] (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiDownloadState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl From<DownloadState> for FfiDownloadState {
    fn from(s: DownloadState) -> Self {
        match s {
            DownloadState::Pending => FfiDownloadState::Pending,
            DownloadState::Downloading => FfiDownloadState::Downloading,
            DownloadState::Paused => FfiDownloadState::Paused,
            DownloadState::Completed => FfiDownloadState::Completed,
            DownloadState::Failed => FfiDownloadState::Failed,
            DownloadState::Cancelled => FfiDownloadState::Cancelled,
        }
    }
}

/// Lookup key a caller holds for an active background download
/// (spec §3: `BackgroundDownloadHandle`).
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBackgroundDownloadHandle {
    pub id: String,
    pub repository_id: String,
    pub backend: FfiBackend,
    pub session_identifier: String,
}

impl From<modeldl_core::BackgroundDownloadHandle> for FfiBackgroundDownloadHandle {
    fn from(h: modeldl_core::BackgroundDownloadHandle) -> Self {
        Self {
            id: h.id.to_string(),
            repository_id: h.repository_id.to_string(),
            backend: h.backend.into(),
            session_identifier: h.session_identifier,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBackgroundDownloadStatus {
    pub id: String,
    pub repository_id: String,
    pub state: FfiDownloadState,
    pub progress: FfiDownloadProgress,
}

impl From<modeldl_core::BackgroundDownloadStatus> for FfiBackgroundDownloadStatus {
    fn from(s: modeldl_core::BackgroundDownloadStatus) -> Self {
        Self {
            id: s.id.to_string(),
            repository_id: s.repository_id.to_string(),
            state: s.state.into(),
            progress: s.progress.into(),
        }
    }
}

#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiValidationResult {
    pub warnings: Vec<String>,
}

impl From<modeldl_core::ValidationResult> for FfiValidationResult {
    fn from(r: modeldl_core::ValidationResult) -> Self {
        Self { warnings: r.warnings }
    }
}

/// Construction parameters for [`FfiModelDownloadEngine`].
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiEngineConfig {
    /// Root directory for finalized models, staging, and durable download
    /// state. The engine lays out `<data_dir>/models`, `<data_dir>/temp`
    /// and a state file directly under it.
    pub data_dir: String,
}

// =============================================================================
// FfiModelDownloadEngine — the main API object exposed to foreign languages
// =============================================================================

/// The download engine's FFI handle. Construct once per process and share
/// across the app; downloads submitted through
/// [`FfiModelDownloadEngine::download_model_in_background`] continue to run
/// (and can be polled for status) across host process backgrounding,
/// matching spec §1's mobile/desktop lifecycle requirement.
#[derive(uniffi::Object)]
pub struct FfiModelDownloadEngine {
    inner: Arc<ModelDownloadEngine>,
    /// Foreground (`download_model`) transfers aren't persisted by the
    /// engine — they're a best-effort call-and-poll convenience for hosts
    /// that don't need the download to survive a process restart. This map
    /// is the polling surface a host uses in place of awaiting a stream.
    foreground_status: Arc<Mutex<HashMap<String, FfiForegroundStatus>>>,
}

#[uniffi::export(async_runtime = "tokio")]
impl FfiModelDownloadEngine {
    /// Construct the engine, rooted at `config.data_dir`. Restores any
    /// background downloads left in-flight by a prior process (spec §4.11
    /// `restore()`) before returning.
    #[uniffi::constructor]
    pub async fn new(config: FfiEngineConfig) -> FfiResult<Arc<Self>> {
        let client = build_client().map_err(FfiError::from)?;
        let resolver = Arc::new(HfFileListResolver::new(client));
        let engine = ModelDownloadEngine::new(EngineConfig::new(&config.data_dir, resolver))
            .await
            .map_err(FfiError::from)?;
        Ok(Arc::new(Self {
            inner: Arc::new(engine),
            foreground_status: Arc::new(Mutex::new(HashMap::new())),
        }))
    }

    /// Start a foreground download. Returns as soon as the transfer has
    /// been accepted; poll [`Self::get_foreground_download_status`] with
    /// the same `repo_id` for progress.
    pub async fn download_model(
        &self,
        repo_id: String,
        backend: FfiBackend,
        headers: Vec<FfiHeader>,
        options: FfiDownloadOptions,
    ) -> FfiResult<()> {
        let repo = parse_repo_id(&repo_id)?;
        let headers: Vec<(String, String)> = headers.into_iter().map(|h| (h.name, h.value)).collect();

        let mut rx = self
            .inner
            .download_model(repo.clone(), backend.into(), headers, options.into())
            .await
            .map_err(FfiError::from)?;

        let status_map = self.foreground_status.clone();
        status_map
            .lock()
            .unwrap()
            .insert(repo_id.clone(), FfiForegroundStatus::not_started());

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let status = match event {
                    Ok(DownloadEvent::Progress(progress)) => FfiForegroundStatus {
                        phase: FfiForegroundPhase::Downloading,
                        fraction_completed: progress.fraction_completed(),
                        error_text: None,
                    },
                    Ok(DownloadEvent::Completed(_)) => FfiForegroundStatus {
                        phase: FfiForegroundPhase::Completed,
                        fraction_completed: 1.0,
                        error_text: None,
                    },
                    Err(e) => FfiForegroundStatus {
                        phase: FfiForegroundPhase::Failed,
                        fraction_completed: 0.0,
                        error_text: Some(e.to_string()),
                    },
                };
                status_map.lock().unwrap().insert(repo_id.clone(), status);
            }
        });

        Ok(())
    }

    /// Poll the status of a foreground download started with
    /// [`Self::download_model`]. Returns `None` if no such download was
    /// ever started on this engine instance.
    pub fn get_foreground_download_status(&self, repo_id: String) -> Option<FfiForegroundStatus> {
        self.foreground_status.lock().unwrap().get(&repo_id).cloned()
    }

    /// Cancel an in-flight foreground download. Returns whether one was
    /// running.
    pub async fn cancel_download(&self, repo_id: String) -> bool {
        let Ok(repo) = parse_repo_id(&repo_id) else {
            return false;
        };
        self.inner.cancel_download(&repo).await
    }

    /// Submit a background download; returns a handle the caller uses for
    /// subsequent status/cancel/pause/resume calls (spec §4.11). The
    /// download continues even if the host process is suspended or
    /// restarted before it completes.
    pub async fn download_model_in_background(
        &self,
        repo_id: String,
        backend: FfiBackend,
        headers: Vec<FfiHeader>,
        options: FfiDownloadOptions,
    ) -> FfiResult<FfiBackgroundDownloadHandle> {
        let repo = parse_repo_id(&repo_id)?;
        let headers: Vec<(String, String)> = headers.into_iter().map(|h| (h.name, h.value)).collect();

        let mut rx = self
            .inner
            .download_model_in_background(repo, backend.into(), headers, options.into())
            .await
            .map_err(FfiError::from)?;

        let handle = match rx.recv().await {
            Some(modeldl_core::BackgroundDownloadEvent::Handle(handle)) => handle,
            _ => {
                return Err(FfiError::Other(
                    "background download did not report a handle".to_string(),
                ))
            }
        };

        // The manager's own state store is the durable source of truth for
        // background progress (unlike the foreground case above); drain the
        // remaining stream so the channel doesn't back up, but nothing more
        // needs to be recorded here.
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        Ok(handle.into())
    }

    pub async fn background_download_status(&self, id: String) -> FfiResult<Option<FfiBackgroundDownloadStatus>> {
        let id = parse_download_id(&id)?;
        Ok(self.inner.background_download_status(id).await.map(Into::into))
    }

    pub async fn list_background_downloads(&self) -> Vec<FfiBackgroundDownloadStatus> {
        self.inner
            .list_background_downloads()
            .await
            .into_iter()
            .map(Into::into)
            .collect()
    }

    pub async fn cancel_background_download(&self, id: String) -> FfiResult<()> {
        let id = parse_download_id(&id)?;
        self.inner.cancel_background_download(id).await.map_err(FfiError::from)
    }

    pub async fn pause_background_download(&self, id: String) -> FfiResult<()> {
        let id = parse_download_id(&id)?;
        self.inner.pause_background_download(id).await.map_err(FfiError::from)
    }

    pub async fn resume_background_download(&self, id: String) -> FfiResult<()> {
        let id = parse_download_id(&id)?;
        self.inner.resume_background_download(id).await.map_err(FfiError::from)
    }

    pub fn delete_model(&self, repo_id: String) -> FfiResult<()> {
        let repo = parse_repo_id(&repo_id)?;
        self.inner.delete_model(&repo).map_err(FfiError::from)
    }

    pub fn list_downloaded_models(&self) -> FfiResult<Vec<FfiModelInfo>> {
        Ok(self
            .inner
            .list_downloaded_models()
            .map_err(FfiError::from)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    pub fn model_exists(&self, repo_id: String) -> bool {
        parse_repo_id(&repo_id)
            .map(|repo| self.inner.model_exists(&repo))
            .unwrap_or(false)
    }

    pub fn get_model_location(&self, repo_id: String) -> Option<String> {
        let repo = parse_repo_id(&repo_id).ok()?;
        self.inner.get_model_location(&repo).map(|p| p.display().to_string())
    }

    pub fn get_model_files(&self, repo_id: String) -> Vec<String> {
        let Ok(repo) = parse_repo_id(&repo_id) else {
            return Vec::new();
        };
        self.inner
            .get_model_files(&repo)
            .into_iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    pub fn get_model_size(&self, repo_id: String) -> Option<u64> {
        let repo = parse_repo_id(&repo_id).ok()?;
        self.inner.get_model_size(&repo)
    }

    pub fn available_disk_space(&self) -> FfiResult<u64> {
        self.inner.available_disk_space().map_err(FfiError::from)
    }

    pub fn validate_model(&self, repo_id: String) -> FfiResult<FfiValidationResult> {
        let repo = parse_repo_id(&repo_id)?;
        Ok(self.inner.validate_model(&repo).map_err(FfiError::from)?.into())
    }

    pub async fn cleanup_incomplete_downloads(&self) -> FfiResult<u64> {
        self.inner
            .cleanup_incomplete_downloads()
            .await
            .map(|n| n as u64)
            .map_err(FfiError::from)
    }
}
