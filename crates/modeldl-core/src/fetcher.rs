//! Streaming Fetcher: per-URL byte-stream transfer for the foreground
//! coordinator (spec §4.3).

use crate::config::NetworkConfig;
use crate::network::{retry_async, RetryConfig};
use crate::{DownloadError, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// Per-transfer pause/cancel flags, keyed by URL in [`StreamingFetcher`].
struct TransferControl {
    cancelled: AtomicBool,
    paused: AtomicBool,
    resume_notify: Notify,
}

impl TransferControl {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            resume_notify: Notify::new(),
        }
    }

    /// Blocks while paused; returns an error immediately if cancelled.
    async fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DownloadError::Cancellation);
        }
        while self.paused.load(Ordering::SeqCst) {
            self.resume_notify.notified().await;
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(DownloadError::Cancellation);
            }
        }
        Ok(())
    }
}

/// A single GET-and-stream-to-disk transfer, with pause/resume/cancel
/// lifecycle management keyed by URL.
pub struct StreamingFetcher {
    client: Client,
    controls: Mutex<HashMap<String, Arc<TransferControl>>>,
}

impl StreamingFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh download: `destination` must not already contain partial data
    /// the caller wants preserved (use [`Self::download_resume`] for that).
    pub async fn download<F>(
        &self,
        url: &str,
        destination: &Path,
        headers: &[(String, String)],
        progress: F,
        expected_size: Option<u64>,
    ) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        self.transfer(url, destination, headers, progress, expected_size, false).await
    }

    /// Resumes a partial download: if `destination` exists with size `n > 0`,
    /// requests `Range: bytes=n-` and appends; expects `206 Partial Content`.
    pub async fn download_resume<F>(
        &self,
        url: &str,
        destination: &Path,
        headers: &[(String, String)],
        progress: F,
        expected_size: Option<u64>,
    ) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        self.transfer(url, destination, headers, progress, expected_size, true).await
    }

    async fn transfer<F>(
        &self,
        url: &str,
        destination: &Path,
        headers: &[(String, String)],
        progress: F,
        expected_size: Option<u64>,
        allow_resume: bool,
    ) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        let control = self.control_for(url);

        let existing_bytes = if allow_resume {
            tokio::fs::metadata(destination).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let retry_config = RetryConfig::new().with_max_attempts(NetworkConfig::DOWNLOAD_MAX_RETRIES);
        let result = retry_async(
            &retry_config,
            || self.attempt(url, destination, headers, &progress, expected_size, existing_bytes, &control),
            DownloadError::is_retryable,
        )
        .await
        .0;

        self.controls.lock().unwrap().remove(url);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<F>(
        &self,
        url: &str,
        destination: &Path,
        headers: &[(String, String)],
        progress: &F,
        expected_size: Option<u64>,
        resume_from: u64,
        control: &Arc<TransferControl>,
    ) -> Result<PathBuf>
    where
        F: Fn(f64) + Send + Sync,
    {
        control.check().await?;

        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if resume_from > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = request.send().await?;
        let status = response.status();

        if resume_from > 0 {
            if status != StatusCode::PARTIAL_CONTENT {
                return Err(DownloadError::DownloadFailed {
                    url: url.to_string(),
                    message: format!("expected 206 for range resume, got {}", status),
                    status: Some(status.as_u16()),
                });
            }
        } else if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::DownloadFailed {
                url: url.to_string(),
                message: format!("unexpected status {}", status),
                status: Some(status.as_u16()),
            });
        }

        let total = expected_size
            .or_else(|| response.content_length().map(|len| len + resume_from));

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io_with_path(e, parent.to_path_buf()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(resume_from > 0)
            .truncate(resume_from == 0)
            .open(destination)
            .await
            .map_err(|e| DownloadError::io_with_path(e, destination.to_path_buf()))?;

        let mut received = resume_from;
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::time::timeout(NetworkConfig::INACTIVITY_TIMEOUT, stream.next()).await;
            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(_) => {
                    return Err(DownloadError::DownloadFailed {
                        url: url.to_string(),
                        message: format!(
                            "no bytes received for {:?}",
                            NetworkConfig::INACTIVITY_TIMEOUT
                        ),
                        status: None,
                    })
                }
            };

            control.check().await?;
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io_with_path(e, destination.to_path_buf()))?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                if total > 0 {
                    progress((received as f64 / total as f64).min(1.0));
                }
            }
        }

        file.flush().await.map_err(|e| DownloadError::io_with_path(e, destination.to_path_buf()))?;
        progress(1.0);
        Ok(destination.to_path_buf())
    }

    fn control_for(&self, url: &str) -> Arc<TransferControl> {
        self.controls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(TransferControl::new()))
            .clone()
    }

    pub fn pause(&self, url: &str) {
        if let Some(control) = self.controls.lock().unwrap().get(url) {
            control.paused.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume(&self, url: &str) {
        if let Some(control) = self.controls.lock().unwrap().get(url) {
            control.paused.store(false, Ordering::SeqCst);
            control.resume_notify.notify_waiters();
        }
    }

    pub fn cancel(&self, url: &str) {
        if let Some(control) = self.controls.lock().unwrap().get(url) {
            control.cancelled.store(true, Ordering::SeqCst);
            control.resume_notify.notify_waiters();
        }
    }

    pub fn pause_all(&self) {
        for control in self.controls.lock().unwrap().values() {
            control.paused.store(true, Ordering::SeqCst);
        }
    }

    pub fn resume_all(&self) {
        for control in self.controls.lock().unwrap().values() {
            control.paused.store(false, Ordering::SeqCst);
            control.resume_notify.notify_waiters();
        }
    }

    pub fn cancel_all(&self) {
        for control in self.controls.lock().unwrap().values() {
            control.cancelled.store(true, Ordering::SeqCst);
            control.resume_notify.notify_waiters();
        }
    }
}
