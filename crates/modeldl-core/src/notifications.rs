//! Notification Sink: the engine's sole collaborator contract for
//! surfacing terminal download outcomes to a host (spec §4.12).

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

/// Notified exactly once per terminal outcome: `model_completed` on
/// success, `download_failed` on any terminal failure. A host that wants OS
/// notifications (banner, toast, tray icon) injects its own implementation
/// at [`crate::engine::ModelDownloadEngine`] construction time.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn model_completed(&self, name: &str, size: u64);
    async fn download_failed(&self, id: Uuid, repo_id: &str, error_text: &str);
}

/// Default sink: logs via `tracing`. Adequate for headless hosts and tests.
#[derive(Debug, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn model_completed(&self, name: &str, size: u64) {
        info!(model = name, bytes = size, "model download completed");
    }

    async fn download_failed(&self, id: Uuid, repo_id: &str, error_text: &str) {
        warn!(download_id = %id, repository = repo_id, error = error_text, "download failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_sink_does_not_panic() {
        let sink = LoggingNotificationSink;
        sink.model_completed("org/model", 1024).await;
        sink.download_failed(Uuid::new_v4(), "org/model", "boom").await;
    }
}
