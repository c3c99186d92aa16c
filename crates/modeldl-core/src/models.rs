//! Core data model: repository identity, backends, file lists, progress and
//! persisted download records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque `"namespace/name"` repository identifier.
///
/// A path-safe form is obtained by replacing every `/` with `_`. Empty
/// strings and values without exactly one `/` are invalid — see
/// [`RepositoryId::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Validate and wrap a raw repository string.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        if raw.is_empty() {
            return Err(crate::DownloadError::InvalidRepositoryIdentifier(
                raw.to_string(),
            ));
        }
        if raw.matches('/').count() != 1 {
            return Err(crate::DownloadError::InvalidRepositoryIdentifier(
                raw.to_string(),
            ));
        }
        let (namespace, name) = raw.split_once('/').unwrap();
        if namespace.is_empty() || name.is_empty() {
            return Err(crate::DownloadError::InvalidRepositoryIdentifier(
                raw.to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path-safe form: every `/` replaced with `_`, every other character
    /// preserved verbatim (spec §6).
    pub fn sanitized(&self) -> String {
        self.0.replace('/', "_")
    }
}

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime flavor the model is prepared for; selects the storage sub-tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Mlx,
    Gguf,
    Coreml,
    Remote,
}

impl Backend {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Backend::Mlx => "mlx",
            Backend::Gguf => "gguf",
            Backend::Coreml => "coreml",
            Backend::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// A single file belonging to a repository, as resolved by the File List
/// Resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub url: String,
    /// POSIX-style path inside the model directory; may contain subdirectories.
    pub relative_path: String,
    /// `None` means unknown size (server did not report `Content-Length`).
    pub size: Option<u64>,
}

/// State of one in-flight transfer for one [`RemoteFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTaskState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// One in-flight transfer for one [`RemoteFile`], tracked by the Background
/// Session Driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTask {
    /// Assigned by the session driver; unique within a `sessionIdentifier`.
    pub task_identifier: u64,
    pub local_staging_path: PathBuf,
    pub bytes_received: u64,
    pub state: FileTaskState,
}

/// Options controlling how a download is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DownloadOptions {
    #[serde(default)]
    pub enable_cellular: bool,
    #[serde(default)]
    pub notification_title: Option<String>,
    #[serde(default = "DownloadOptions::default_priority")]
    pub priority: Priority,
    #[serde(default = "DownloadOptions::default_discretionary")]
    pub is_discretionary: bool,
}

impl DownloadOptions {
    fn default_priority() -> Priority {
        Priority::Normal
    }
    fn default_discretionary() -> bool {
        true
    }

    /// Bounded per-download file concurrency derived from `priority` (spec §5).
    pub fn file_concurrency(&self) -> usize {
        match self.priority {
            Priority::Low => crate::config::BackendConfig::LOW_PRIORITY_FILE_CONCURRENCY,
            Priority::Normal => crate::config::BackendConfig::DEFAULT_FILE_CONCURRENCY,
            Priority::High => crate::config::BackendConfig::HIGH_PRIORITY_FILE_CONCURRENCY,
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            enable_cellular: false,
            notification_title: None,
            priority: Priority::Normal,
            is_discretionary: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// State of a [`PersistedDownload`] (spec §4.8 state diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }
}

/// Durable record of a multi-file download, keyed by `id` (distinct from
/// [`ModelId`] — one `PersistedDownload` per download attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PersistedDownload {
    pub id: Uuid,
    pub repository_id: RepositoryId,
    pub backend: Backend,
    /// Opaque name of the driver session that owns this download's tasks.
    pub session_identifier: String,
    pub options: DownloadOptions,
    #[serde(default)]
    pub task_identifiers: HashMap<String, u64>,
    pub download_date: chrono::DateTime<chrono::Utc>,
    pub expected_files: Vec<String>,
    #[serde(default)]
    pub completed_files: std::collections::BTreeSet<String>,
    pub file_downloads: Vec<RemoteFile>,
    pub total_bytes: u64,
    #[serde(default)]
    pub bytes_downloaded: u64,
    pub state: DownloadState,
    #[serde(default)]
    pub error_text: Option<String>,
}

impl PersistedDownload {
    pub fn is_complete(&self) -> bool {
        self.completed_files.len() == self.expected_files.len()
    }
}

/// Finalized artifact written by [`crate::layout::FileLayout::finalize_download`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: Uuid,
    pub name: String,
    pub backend: Backend,
    pub location: PathBuf,
    pub total_size: u64,
    pub download_date: chrono::DateTime<chrono::Utc>,
    pub metadata: HashMap<String, String>,
}

/// Foreground download status, tagged by phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadStatus {
    NotStarted,
    Downloading { progress: f64 },
    Paused { progress: f64 },
    Completed,
    Failed { error_text: String },
    Cancelled,
}

impl DownloadStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, DownloadStatus::Completed)
    }
    pub fn is_downloading(&self) -> bool {
        matches!(self, DownloadStatus::Downloading { .. })
    }
    pub fn is_paused(&self) -> bool {
        matches!(self, DownloadStatus::Paused { .. })
    }
}

/// Aggregated progress across all files in one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    pub files_completed: usize,
    pub total_files: usize,
    pub current_file_name: Option<String>,
}

impl DownloadProgress {
    pub fn fraction_completed(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_downloaded as f64 / self.total_bytes as f64
        }
    }

    pub fn percentage(&self) -> f64 {
        100.0 * self.fraction_completed()
    }

    pub fn is_complete(&self) -> bool {
        self.files_completed == self.total_files && self.bytes_downloaded == self.total_bytes
    }
}

/// Lookup key callers hold for an active background download; the manager
/// exclusively owns the corresponding [`PersistedDownload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundDownloadHandle {
    pub id: Uuid,
    pub repository_id: RepositoryId,
    pub backend: Backend,
    pub session_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundDownloadStatus {
    pub id: Uuid,
    pub repository_id: RepositoryId,
    pub state: DownloadState,
    pub progress: DownloadProgress,
}

/// Streaming event for a foreground `downloadModel` call.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    Completed(ModelInfo),
}

/// Streaming event for a `downloadModelInBackground` call.
#[derive(Debug, Clone)]
pub enum BackgroundDownloadEvent {
    Handle(BackgroundDownloadHandle),
    Progress(DownloadProgress),
    Completed(ModelInfo),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_id_requires_single_slash() {
        assert!(RepositoryId::parse("mlx-community/Llama-3.2-1B-Instruct-4bit").is_ok());
        assert!(RepositoryId::parse("").is_err());
        assert!(RepositoryId::parse("no-slash").is_err());
        assert!(RepositoryId::parse("a/b/c").is_err());
        assert!(RepositoryId::parse("/name").is_err());
        assert!(RepositoryId::parse("namespace/").is_err());
    }

    #[test]
    fn sanitized_replaces_all_slashes() {
        let id = RepositoryId::parse("unsloth/Qwen3-0.6B-GGUF").unwrap();
        assert_eq!(id.sanitized(), "unsloth_Qwen3-0.6B-GGUF");
    }

    #[test]
    fn download_progress_derived_fields() {
        let p = DownloadProgress {
            bytes_downloaded: 818,
            total_bytes: 818,
            files_completed: 7,
            total_files: 7,
            current_file_name: None,
        };
        assert!((p.fraction_completed() - 1.0).abs() < f64::EPSILON);
        assert!(p.is_complete());

        let empty = DownloadProgress {
            bytes_downloaded: 0,
            total_bytes: 0,
            files_completed: 0,
            total_files: 0,
            current_file_name: None,
        };
        assert_eq!(empty.fraction_completed(), 0.0);
    }

    #[test]
    fn download_options_roundtrip() {
        let opts = DownloadOptions {
            enable_cellular: true,
            notification_title: Some("t".into()),
            priority: Priority::High,
            is_discretionary: false,
        };
        let json = serde_json::to_string(&opts).unwrap();
        let back: DownloadOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.enable_cellular, opts.enable_cellular);
        assert_eq!(back.priority, opts.priority);
    }

    #[test]
    fn persisted_download_completed_files_subset_invariant() {
        let mut pd_completed = std::collections::BTreeSet::new();
        pd_completed.insert("model.bin".to_string());
        let expected = vec!["model.bin".to_string(), "config.json".to_string()];
        assert!(pd_completed.is_subset(&expected.iter().cloned().collect()));
    }
}
