//! File Layout: canonical on-disk paths, staging directories, atomic moves
//! and disk-space queries (spec §4.2).

use crate::config::PathsConfig;
use crate::identity::{generate_model_id, generate_model_id_from_str};
use crate::models::{Backend, ModelInfo, RepositoryId};
use crate::{DownloadError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, warn};
use walkdir::WalkDir;

const ALL_BACKENDS: [Backend; 4] = [Backend::Mlx, Backend::Gguf, Backend::Coreml, Backend::Remote];

/// Owns the `models` and `temp` roots; every mutator that touches either
/// tree goes through this type (spec §5: shared resources are process-scoped
/// and serialized by File Layout).
#[derive(Debug, Clone)]
pub struct FileLayout {
    models_root: PathBuf,
    temp_root: PathBuf,
}

impl FileLayout {
    pub fn new(models_root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            models_root: models_root.into(),
            temp_root: temp_root.into(),
        }
    }

    pub fn models_root(&self) -> &Path {
        &self.models_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// `<models>/<backend>/<sanitized-repoId>`.
    pub fn model_directory(&self, repo_id: &RepositoryId, backend: Backend) -> PathBuf {
        self.models_root
            .join(backend.dir_name())
            .join(repo_id.sanitized())
    }

    /// `<temp>/<sanitized-repoId>`.
    pub fn temporary_directory(&self, repo_id: &RepositoryId) -> PathBuf {
        self.temp_root.join(repo_id.sanitized())
    }

    /// Atomically promote a completed staging directory into its canonical
    /// location and write the `model_info.json` sidecar.
    ///
    /// Observers see either the prior contents (possibly absent) or the
    /// complete new tree — never a partial one — because assembly finishes
    /// entirely inside `from` before the single rename.
    pub fn finalize_download(
        &self,
        repo_id: &RepositoryId,
        name: &str,
        backend: Backend,
        from: &Path,
        total_size: u64,
    ) -> Result<ModelInfo> {
        let destination = self.model_directory(repo_id, backend);

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DownloadError::io_with_path(e, parent))?;
        }

        if destination.exists() {
            std::fs::remove_dir_all(&destination)
                .map_err(|e| DownloadError::io_with_path(e, destination.clone()))?;
        }

        self.move_dir(from, &destination)?;

        let mut metadata = HashMap::new();
        metadata.insert("repositoryId".to_string(), repo_id.to_string());
        metadata.insert("source".to_string(), "huggingface".to_string());
        metadata.insert("downloadType".to_string(), "repository-based".to_string());

        let info = ModelInfo {
            id: generate_model_id(repo_id),
            name: name.to_string(),
            backend,
            location: destination.clone(),
            total_size,
            download_date: Utc::now(),
            metadata,
        };

        let sidecar = destination.join(PathsConfig::MODEL_INFO_FILENAME);
        crate::metadata::atomic_write_json(&sidecar, &info, false)?;

        Ok(info)
    }

    /// Rename `from` to `to`; falls back to recursive copy+remove when the
    /// two paths live on different volumes (`rename` returns `EXDEV`).
    fn move_dir(&self, from: &Path, to: &Path) -> Result<()> {
        match std::fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
                // Cross-volume: stage the copy in a sibling of the destination
                // so the rename at the end is still atomic to observers.
                let sibling = to.with_extension("finalize-tmp");
                if sibling.exists() {
                    std::fs::remove_dir_all(&sibling).ok();
                }
                copy_dir_recursive(from, &sibling)?;
                std::fs::rename(&sibling, to)
                    .map_err(|e| DownloadError::io_with_path(e, to.to_path_buf()))?;
                std::fs::remove_dir_all(from).ok();
                Ok(())
            }
            Err(e) => Err(DownloadError::io_with_path(e, to.to_path_buf())),
        }
    }

    /// Enumerate finalized models across all backend directories. Recovers
    /// from a missing sidecar (crash between move and sidecar write) by
    /// synthesizing and persisting one.
    pub fn list_downloaded_models(&self) -> Result<Vec<ModelInfo>> {
        let mut models = Vec::new();

        for backend in ALL_BACKENDS {
            let backend_dir = self.models_root.join(backend.dir_name());
            if !backend_dir.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(&backend_dir)
                .map_err(|e| DownloadError::io_with_path(e, backend_dir.clone()))?
            {
                let entry = entry.map_err(|e| DownloadError::io_with_path(e, backend_dir.clone()))?;
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }

                let dir = entry.path();
                let sidecar = dir.join(PathsConfig::MODEL_INFO_FILENAME);

                match crate::metadata::atomic_read_json::<ModelInfo>(&sidecar)? {
                    Some(info) => models.push(info),
                    None => {
                        warn!("missing sidecar for {}, synthesizing", dir.display());
                        let dirname = dir
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        let total_size = dir_size(&dir);
                        let mut metadata = HashMap::new();
                        metadata.insert("repositoryId".to_string(), dirname.clone());
                        metadata.insert("source".to_string(), "huggingface".to_string());
                        metadata.insert("downloadType".to_string(), "repository-based".to_string());

                        let info = ModelInfo {
                            id: generate_model_id_from_str(&dirname),
                            name: dirname,
                            backend,
                            location: dir.clone(),
                            total_size,
                            download_date: Utc::now(),
                            metadata,
                        };
                        crate::metadata::atomic_write_json(&sidecar, &info, false)?;
                        models.push(info);
                    }
                }
            }
        }

        Ok(models)
    }

    pub fn model_exists(&self, repo_id: &RepositoryId) -> bool {
        ALL_BACKENDS
            .iter()
            .any(|b| self.model_directory(repo_id, *b).is_dir())
    }

    /// Remove every backend's copy of `repoId`; idempotent.
    pub fn delete_model(&self, repo_id: &RepositoryId) -> Result<()> {
        for backend in ALL_BACKENDS {
            let dir = self.model_directory(repo_id, backend);
            if dir.is_dir() {
                std::fs::remove_dir_all(&dir).map_err(|e| DownloadError::io_with_path(e, dir))?;
            }
        }
        Ok(())
    }

    pub fn get_model_location(&self, repo_id: &RepositoryId) -> Option<PathBuf> {
        ALL_BACKENDS
            .iter()
            .map(|b| self.model_directory(repo_id, *b))
            .find(|d| d.is_dir())
    }

    pub fn get_model_files(&self, repo_id: &RepositoryId) -> Vec<PathBuf> {
        let Some(dir) = self.get_model_location(repo_id) else {
            return Vec::new();
        };
        WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    pub fn get_model_size(&self, repo_id: &RepositoryId) -> Option<u64> {
        self.get_model_location(repo_id).map(|dir| dir_size(&dir))
    }

    /// Disk space available on the volume containing `models_root`.
    pub fn available_disk_space(&self) -> Result<u64> {
        let disks = Disks::new_with_refreshed_list();
        let path_str = self.models_root.to_string_lossy();

        let mut best: Option<(&sysinfo::Disk, usize)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point().to_string_lossy();
            if path_str.starts_with(mount.as_ref()) {
                let len = mount.len();
                if best.map_or(true, |(_, l)| len > l) {
                    best = Some((disk, len));
                }
            }
        }

        if let Some((disk, _)) = best {
            return Ok(disk.available_space());
        }
        disks
            .list()
            .first()
            .map(|d| d.available_space())
            .ok_or_else(|| DownloadError::Other("could not determine disk space".to_string()))
    }

    pub fn has_enough_space(&self, required: u64) -> Result<bool> {
        Ok(self.available_disk_space()? >= required)
    }

    /// Remove every staging subdirectory older than the grace period that
    /// isn't referenced by `active_repo_ids` (spec §4.2).
    pub fn cleanup_incomplete_downloads(&self, active_repo_ids: &[String]) -> Result<usize> {
        if !self.temp_root.is_dir() {
            return Ok(0);
        }
        let cutoff = std::time::SystemTime::now() - PathsConfig::STAGING_GRACE_PERIOD;
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.temp_root)
            .map_err(|e| DownloadError::io_with_path(e, self.temp_root.clone()))?
        {
            let entry = entry.map_err(|e| DownloadError::io_with_path(e, self.temp_root.clone()))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if active_repo_ids.contains(&name) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if modified < cutoff {
                debug!("removing stale staging dir {}", path.display());
                std::fs::remove_dir_all(&path).ok();
                removed += 1;
            }
        }

        Ok(removed)
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| DownloadError::io_with_path(e, to.to_path_buf()))?;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| DownloadError::Other(e.to_string()))?;
        let rel = entry.path().strip_prefix(from).unwrap();
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| DownloadError::io_with_path(e, target))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| DownloadError::io_with_path(e, target))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    libc::EXDEV
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    18 // EXDEV on Windows' errno-compatible layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> (TempDir, FileLayout) {
        let tmp = TempDir::new().unwrap();
        let layout = FileLayout::new(tmp.path().join("models"), tmp.path().join("temp"));
        (tmp, layout)
    }

    #[test]
    fn model_directory_uses_sanitized_repo_id() {
        let (_tmp, layout) = layout();
        let repo = RepositoryId::parse("mlx-community/Llama-3.2-1B-Instruct-4bit").unwrap();
        let dir = layout.model_directory(&repo, Backend::Mlx);
        assert!(dir.ends_with("mlx/mlx-community_Llama-3.2-1B-Instruct-4bit"));
    }

    #[test]
    fn finalize_then_model_exists_and_sidecar_round_trips() {
        let (_tmp, layout) = layout();
        let repo = RepositoryId::parse("unsloth/Qwen3-0.6B-GGUF").unwrap();

        let staging = layout.temporary_directory(&repo);
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("model.gguf"), vec![0u8; 128]).unwrap();

        let info = layout
            .finalize_download(&repo, repo.as_str(), Backend::Gguf, &staging, 128)
            .unwrap();

        assert!(layout.model_exists(&repo));
        assert_eq!(info.id, generate_model_id(&repo));
        assert_eq!(info.metadata.get("repositoryId").unwrap(), repo.as_str());

        let files = layout.get_model_files(&repo);
        assert!(files.iter().any(|f| f.ends_with("model.gguf")));
    }

    #[test]
    fn delete_model_is_idempotent() {
        let (_tmp, layout) = layout();
        let repo = RepositoryId::parse("org/model").unwrap();
        layout.delete_model(&repo).unwrap();
        layout.delete_model(&repo).unwrap();
    }

    #[test]
    fn list_downloaded_models_recovers_missing_sidecar() {
        let (_tmp, layout) = layout();
        let repo = RepositoryId::parse("acme/widget").unwrap();
        let dir = layout.model_directory(&repo, Backend::Remote);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("payload.bin"), vec![1u8; 64]).unwrap();

        let models = layout.list_downloaded_models().unwrap();
        assert_eq!(models.len(), 1);
        assert!(models[0].total_size > 0);
        assert!(dir.join(PathsConfig::MODEL_INFO_FILENAME).exists());
    }

    #[test]
    fn cleanup_incomplete_downloads_preserves_active() {
        let (_tmp, layout) = layout();
        std::fs::create_dir_all(layout.temp_root().join("active_repo")).unwrap();
        let removed = layout
            .cleanup_incomplete_downloads(&["active_repo".to_string()])
            .unwrap();
        assert_eq!(removed, 0);
        assert!(layout.temp_root().join("active_repo").exists());
    }
}
