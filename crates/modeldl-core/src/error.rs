//! Error types for the download engine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the download engine.
#[derive(Debug, Error)]
pub enum DownloadError {
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
        /// HTTP status that triggered the failure, when there was one; `None`
        /// for faults with no response (e.g. an inactivity timeout).
        status: Option<u16>,
    },

    #[error("cancelled")]
    Cancellation,

    #[error("archive is not a valid zip: {0}")]
    ArchiveInvalid(PathBuf),

    #[error("extraction failed for {path}: {message}")]
    ExtractionFailed { path: PathBuf, message: String },

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    DiskFull { needed: u64, available: u64 },

    #[error("filesystem error at {path:?}: {message}")]
    FilesystemError {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("state store corrupted: {0}")]
    StateCorrupted(String),

    #[error("{0}")]
    Other(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for download engine operations.
pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    /// Attach a path to an io error produced outside a `?` conversion.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DownloadError::FilesystemError {
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Convert to a JSON-RPC error code (spec §7 error kinds, mapped onto the
    /// standard JSON-RPC reserved range plus an application range).
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            DownloadError::Network(_) => -32000,
            DownloadError::InvalidRepositoryIdentifier(_) => -32001,
            DownloadError::ModelAlreadyDownloaded(_) => -32002,
            DownloadError::NoFilesToDownload => -32003,
            DownloadError::DownloadFailed { .. } => -32004,
            DownloadError::Cancellation => -32005,
            DownloadError::ArchiveInvalid(_) | DownloadError::ExtractionFailed { .. } => -32006,
            DownloadError::DiskFull { .. } | DownloadError::FilesystemError { .. } => -32007,
            DownloadError::StateCorrupted(_) => -32008,
            _ => -32603,
        }
    }

    /// Whether this error represents a transient fault the driver should retry
    /// (spec §7: transient network faults are retried with backoff; archive
    /// and finalization failures are not). A `DownloadFailed` with a status
    /// code defers to `is_retryable_status`/`is_permanent_failure`; one with
    /// no status (no response was ever received) is treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::DownloadFailed { status: None, .. } => true,
            DownloadError::DownloadFailed {
                status: Some(status),
                ..
            } => match reqwest::StatusCode::from_u16(*status) {
                Ok(status) => crate::network::is_retryable_status(status),
                Err(_) => true,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_codes() {
        assert_eq!(
            DownloadError::InvalidRepositoryIdentifier("x".into()).to_rpc_error_code(),
            -32001
        );
        assert_eq!(DownloadError::Cancellation.to_rpc_error_code(), -32005);
    }

    #[test]
    fn retryable_errors() {
        assert!(DownloadError::DownloadFailed {
            url: "http://x".into(),
            message: "no bytes received".into(),
            status: None,
        }
        .is_retryable());
        assert!(DownloadError::DownloadFailed {
            url: "http://x".into(),
            message: "unexpected status 503".into(),
            status: Some(503),
        }
        .is_retryable());
        assert!(!DownloadError::DownloadFailed {
            url: "http://x".into(),
            message: "unexpected status 404".into(),
            status: Some(404),
        }
        .is_retryable());
        assert!(!DownloadError::ArchiveInvalid("a.zip".into()).is_retryable());
    }
}
