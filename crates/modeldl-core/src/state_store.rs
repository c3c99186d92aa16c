//! State Store: durable persistence of [`PersistedDownload`] records so the
//! Background Download Manager can survive a process restart (spec §4.9).

use crate::config::BackendConfig;
use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::models::{DownloadState, PersistedDownload};
use crate::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct StateStoreData {
    #[serde(default)]
    downloads: Vec<PersistedDownload>,
}

/// Single JSON file holding every [`PersistedDownload`] the manager knows
/// about, keyed by `id`. Serialized behind a mutex so concurrent writers
/// from different mailboxes never interleave a read-modify-write cycle.
pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(format!("{}.json", BackendConfig::PERSISTED_STATE_KEY)),
            lock: Mutex::new(()),
        }
    }

    pub async fn persist_download(&self, download: &PersistedDownload) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_data();
        match data.downloads.iter_mut().find(|d| d.id == download.id) {
            Some(existing) => *existing = download.clone(),
            None => data.downloads.push(download.clone()),
        }
        self.write_data(&data)
    }

    pub async fn remove_download(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_data();
        data.downloads.retain(|d| d.id != id);
        self.write_data(&data)
    }

    pub async fn get_download(&self, id: Uuid) -> Option<PersistedDownload> {
        let _guard = self.lock.lock().await;
        self.load_data().downloads.into_iter().find(|d| d.id == id)
    }

    pub async fn get_all_persisted_downloads(&self) -> Vec<PersistedDownload> {
        let _guard = self.lock.lock().await;
        self.load_data().downloads
    }

    /// Update the mutable progress fields of one record in place; a no-op if
    /// `id` is not present (the download may have been removed concurrently).
    pub async fn update_download_progress(
        &self,
        id: Uuid,
        bytes_downloaded: u64,
        completed_files: Option<BTreeSet<String>>,
        state: Option<DownloadState>,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_data();
        let Some(record) = data.downloads.iter_mut().find(|d| d.id == id) else {
            return Ok(());
        };
        record.bytes_downloaded = bytes_downloaded;
        if let Some(completed) = completed_files {
            record.completed_files = completed;
        }
        if let Some(state) = state {
            record.state = state;
        }
        self.write_data(&data)
    }

    pub async fn update_download_task_identifier(
        &self,
        id: Uuid,
        relative_path: &str,
        task_identifier: u64,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_data();
        let Some(record) = data.downloads.iter_mut().find(|d| d.id == id) else {
            return Ok(());
        };
        record
            .task_identifiers
            .insert(relative_path.to_string(), task_identifier);
        self.write_data(&data)
    }

    /// Remove terminal records older than `older_than`; `downloading`,
    /// `paused`, and `pending` records are preserved regardless of age
    /// (spec §4.9) because they still represent recoverable work.
    pub async fn cleanup_stale_downloads(&self, older_than: chrono::Duration) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut data = self.load_data();
        let cutoff = chrono::Utc::now() - older_than;
        let before = data.downloads.len();
        data.downloads
            .retain(|d| !(d.state.is_terminal() && d.download_date < cutoff));
        let removed = before - data.downloads.len();
        if removed > 0 {
            self.write_data(&data)?;
        }
        Ok(removed)
    }

    pub async fn clear_all_downloads(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_data(&StateStoreData::default())
    }

    /// Self-healing read (spec §7): a corrupted store is logged, erased, and
    /// treated as empty rather than surfaced as a startup failure.
    fn load_data(&self) -> StateStoreData {
        match atomic_read_json::<StateStoreData>(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => StateStoreData::default(),
            Err(e) => {
                warn!(
                    "download state store at {} is corrupted ({}), discarding",
                    self.path.display(),
                    e
                );
                std::fs::remove_file(&self.path).ok();
                StateStoreData::default()
            }
        }
    }

    fn write_data(&self, data: &StateStoreData) -> Result<()> {
        debug!(
            "persisting {} download record(s) to {}",
            data.downloads.len(),
            self.path.display()
        );
        atomic_write_json(&self.path, data, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Backend, DownloadOptions, RemoteFile, RepositoryId};
    use tempfile::TempDir;

    fn sample(id: Uuid) -> PersistedDownload {
        PersistedDownload {
            id,
            repository_id: RepositoryId::parse("org/model").unwrap(),
            backend: Backend::Gguf,
            session_identifier: "session-1".to_string(),
            options: DownloadOptions::default(),
            task_identifiers: Default::default(),
            download_date: chrono::Utc::now(),
            expected_files: vec!["model.gguf".to_string()],
            completed_files: Default::default(),
            file_downloads: vec![RemoteFile {
                url: "https://example.com/model.gguf".into(),
                relative_path: "model.gguf".into(),
                size: Some(100),
            }],
            total_bytes: 100,
            bytes_downloaded: 0,
            state: DownloadState::Pending,
            error_text: None,
        }
    }

    #[tokio::test]
    async fn persist_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let id = Uuid::new_v4();
        store.persist_download(&sample(id)).await.unwrap();

        let loaded = store.get_download(id).await.unwrap();
        assert_eq!(loaded.id, id);
    }

    #[tokio::test]
    async fn persist_upserts_by_id() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let id = Uuid::new_v4();
        store.persist_download(&sample(id)).await.unwrap();

        let mut updated = sample(id);
        updated.state = DownloadState::Completed;
        store.persist_download(&updated).await.unwrap();

        let all = store.get_all_persisted_downloads().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, DownloadState::Completed);
    }

    #[tokio::test]
    async fn remove_deletes_record() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let id = Uuid::new_v4();
        store.persist_download(&sample(id)).await.unwrap();
        store.remove_download(id).await.unwrap();
        assert!(store.get_download(id).await.is_none());
    }

    #[tokio::test]
    async fn load_empty_store_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(store.get_all_persisted_downloads().await.is_empty());
    }

    #[tokio::test]
    async fn update_progress_mutates_only_progress_fields() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let id = Uuid::new_v4();
        store.persist_download(&sample(id)).await.unwrap();

        let mut completed = BTreeSet::new();
        completed.insert("model.gguf".to_string());
        store
            .update_download_progress(id, 100, Some(completed.clone()), Some(DownloadState::Completed))
            .await
            .unwrap();

        let record = store.get_download(id).await.unwrap();
        assert_eq!(record.bytes_downloaded, 100);
        assert_eq!(record.completed_files, completed);
        assert_eq!(record.state, DownloadState::Completed);
        assert_eq!(record.repository_id.as_str(), "org/model");
    }

    #[tokio::test]
    async fn cleanup_preserves_active_states() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let mut old_complete = sample(Uuid::new_v4());
        old_complete.state = DownloadState::Completed;
        old_complete.download_date = chrono::Utc::now() - chrono::Duration::days(30);
        store.persist_download(&old_complete).await.unwrap();

        let mut old_downloading = sample(Uuid::new_v4());
        old_downloading.state = DownloadState::Downloading;
        old_downloading.download_date = chrono::Utc::now() - chrono::Duration::days(30);
        store.persist_download(&old_downloading).await.unwrap();

        let removed = store.cleanup_stale_downloads(chrono::Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);

        let remaining = store.get_all_persisted_downloads().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].state, DownloadState::Downloading);
    }

    #[tokio::test]
    async fn corrupted_store_self_heals_to_empty() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        std::fs::write(tmp.path().join(format!("{}.json", BackendConfig::PERSISTED_STATE_KEY)), b"not json").unwrap();

        let all = store.get_all_persisted_downloads().await;
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn clear_all_downloads_empties_store() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        store.persist_download(&sample(Uuid::new_v4())).await.unwrap();
        store.clear_all_downloads().await.unwrap();
        assert!(store.get_all_persisted_downloads().await.is_empty());
    }
}
